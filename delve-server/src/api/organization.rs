//! Organization CRUD, invites, membership management

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::{required, required_id, AuthUser, ValidJson};
use crate::error::{ApiError, ApiResult};
use crate::models::{MemberInfo, OrgMembership, Organization, Role};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct OrganizationsResponse {
    pub current: Option<OrgMembership>,
    pub organizations: Vec<OrgMembership>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchRequest {
    #[serde(default)]
    pub org_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteResponse {
    pub code: String,
    pub email: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CodeQuery {
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyInviteResponse {
    pub organization: Organization,
    pub email: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub role: Option<String>,
}

fn parse_role(raw: &str) -> ApiResult<Role> {
    Ok(raw.parse()?)
}

/// GET /organization
pub async fn list_organizations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<OrganizationsResponse>> {
    let current = state.organizations.current_organization(user.id).await?;
    let organizations = state.organizations.user_organizations(user.id).await?;
    Ok(Json(OrganizationsResponse {
        current,
        organizations,
    }))
}

/// POST /organization
pub async fn create_organization(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidJson(request): ValidJson<CreateOrganizationRequest>,
) -> ApiResult<(StatusCode, Json<Organization>)> {
    let name = required(request.name, "name")?;
    let slug = required(request.slug, "slug")?;

    let org = state.organizations.create(user.id, &name, &slug).await?;
    Ok((StatusCode::CREATED, Json(org)))
}

/// POST /organization/switch
pub async fn switch_organization(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidJson(request): ValidJson<SwitchRequest>,
) -> ApiResult<Json<Value>> {
    let org_id = required_id(request.org_id, "orgId")?;
    state.organizations.switch(user.id, org_id).await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /organization/invite
///
/// Invites into the caller's current organization.
pub async fn create_invite(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidJson(request): ValidJson<InviteRequest>,
) -> ApiResult<Json<InviteResponse>> {
    let email = required(request.email, "email")?;
    let role = match request.role {
        Some(raw) => parse_role(raw.trim())?,
        None => Role::Member,
    };

    let membership = state
        .organizations
        .current_organization(user.id)
        .await?
        .ok_or(ApiError::NoActiveOrganization)?;

    let invite = state
        .organizations
        .create_invite(user.id, membership.organization.id, &email, role)
        .await?;

    Ok(Json(InviteResponse {
        code: invite.code,
        email: invite.email,
        role: invite.role,
        expires_at: invite.expires_at,
    }))
}

/// GET /organization/invite/verify?code=
pub async fn verify_invite(
    State(state): State<AppState>,
    Query(query): Query<CodeQuery>,
) -> ApiResult<Json<VerifyInviteResponse>> {
    let code = required(query.code, "code")?;
    let verified = state.organizations.verify_invite(&code).await?;

    Ok(Json(VerifyInviteResponse {
        organization: verified.organization,
        email: verified.invite.email,
        role: verified.invite.role,
        expires_at: verified.invite.expires_at,
    }))
}

/// POST /organization/join
pub async fn join_organization(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidJson(request): ValidJson<JoinRequest>,
) -> ApiResult<Json<Organization>> {
    let code = required(request.code, "code")?;
    Ok(Json(state.organizations.accept_invite(&code, user.id).await?))
}

/// GET /organization/:org_id/members
pub async fn list_members(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Json<Vec<MemberInfo>>> {
    Ok(Json(state.organizations.list_members(user.id, org_id).await?))
}

/// DELETE /organization/:org_id/members/:user_id
pub async fn remove_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((org_id, target)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Value>> {
    state.organizations.remove_member(user.id, org_id, target).await?;
    Ok(Json(json!({ "success": true })))
}

/// PATCH /organization/:org_id/members/:user_id
pub async fn update_member_role(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((org_id, target)): Path<(Uuid, Uuid)>,
    ValidJson(request): ValidJson<UpdateRoleRequest>,
) -> ApiResult<Json<Value>> {
    let role = parse_role(&required(request.role, "role")?)?;
    state
        .organizations
        .update_member_role(user.id, org_id, target, role)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// Build organization routes
pub fn organization_routes() -> Router<AppState> {
    Router::new()
        .route("/organization", get(list_organizations).post(create_organization))
        .route("/organization/switch", post(switch_organization))
        .route("/organization/invite", post(create_invite))
        .route("/organization/invite/verify", get(verify_invite))
        .route("/organization/join", post(join_organization))
        .route("/organization/:org_id/members", get(list_members))
        .route(
            "/organization/:org_id/members/:user_id",
            delete(remove_member).patch(update_member_role),
        )
}
