//! Organizations, memberships and invites

use chrono::Duration;
use delve_common::events::{DelveEvent, EventBus};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Actor, MemberInfo, OrgInvite, OrgMembership, OrgSubscription, Organization, Permission, PlanId, Role,
    TransactionType,
};
use crate::services::ledger::{add_in_tx, CreditLedger};
use crate::services::subscription::SubscriptionService;
use crate::utils::retry_on_lock;

const INVITE_CODE_LEN: usize = 12;
const INVITE_TTL_DAYS: i64 = 7;
const SLUG_MIN: usize = 2;
const SLUG_MAX: usize = 48;

/// Slug: 2-48 characters of `[a-z0-9-]`
pub fn is_valid_slug(slug: &str) -> bool {
    (SLUG_MIN..=SLUG_MAX).contains(&slug.len())
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn generate_invite_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INVITE_CODE_LEN)
        .map(char::from)
        .collect()
}

/// Invite resolved by its code
#[derive(Debug, Clone)]
pub struct VerifiedInvite {
    pub invite: OrgInvite,
    pub organization: Organization,
}

enum JoinOutcome {
    Joined,
    InviteUsed,
    Full,
}

#[derive(Clone)]
pub struct OrganizationService {
    db: SqlitePool,
    subscriptions: SubscriptionService,
    ledger: CreditLedger,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
}

impl OrganizationService {
    pub fn new(
        db: SqlitePool,
        subscriptions: SubscriptionService,
        ledger: CreditLedger,
        event_bus: EventBus,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            subscriptions,
            ledger,
            event_bus,
            max_lock_wait_ms,
        }
    }

    /// Create an organization owned by `user_id`
    ///
    /// One transaction: organization, owner membership, starting balance
    /// (the free plan's monthly credits, logged as `bonus`), a free
    /// subscription marked as already granted for this month, and the
    /// user's active organization.
    pub async fn create(&self, user_id: Uuid, name: &str, slug: &str) -> ApiResult<Organization> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::Validation("Organization name is required".to_string()));
        }
        if !is_valid_slug(slug) {
            return Err(ApiError::Validation(
                "Slug must be 2-48 characters of lowercase letters, digits or '-'".to_string(),
            ));
        }
        if db::organizations::slug_exists(&self.db, slug).await? {
            return Err(ApiError::Validation(format!("Slug '{}' is already taken", slug)));
        }

        let now = delve_common::time::now();
        let org = Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            created_at: now,
            updated_at: now,
        };
        let initial_credits = PlanId::Free.plan().features.monthly_credits;
        let mut subscription = OrgSubscription::new(org.id, PlanId::Free, now);
        subscription.last_credit_grant_at = Some(now);

        let balance = retry_on_lock("organization create", self.max_lock_wait_ms, || async {
            let mut tx = self.db.begin().await?;
            db::organizations::insert_organization(&mut tx, &org).await?;
            db::organizations::insert_member(&mut tx, org.id, user_id, Role::Owner).await?;
            let balance = add_in_tx(
                &mut tx,
                org.id,
                Actor::User(user_id),
                initial_credits,
                TransactionType::Bonus,
                "New organization welcome credits",
                None,
            )
            .await?;
            db::subscriptions::insert_subscription_if_absent(&mut *tx, &subscription).await?;
            db::users::set_active_org(&mut *tx, user_id, Some(org.id)).await?;
            tx.commit().await?;
            Ok::<_, delve_common::Error>(balance)
        })
        .await
        .map_err(|e| match e {
            // Lost a race on the slug between the check and the insert
            delve_common::Error::Database(ref db_err) if db_err.to_string().contains("UNIQUE") => {
                ApiError::Validation(format!("Slug '{}' is already taken", slug))
            }
            other => other.into(),
        })?;

        info!(org_id = %org.id, slug = %org.slug, owner = %user_id, "Organization created");
        self.ledger.publish_change(org.id, balance, initial_credits);
        self.publish_change(org.id, "created");
        Ok(org)
    }

    /// Active organization if still a member, else the most recently joined
    pub async fn current_organization(&self, user_id: Uuid) -> ApiResult<Option<OrgMembership>> {
        let memberships = db::organizations::memberships_for_user(&self.db, user_id).await?;
        if memberships.is_empty() {
            return Ok(None);
        }

        let active = db::users::find_user(&self.db, user_id)
            .await?
            .and_then(|u| u.active_org_id);

        let chosen = active
            .and_then(|id| memberships.iter().position(|m| m.organization.id == id))
            .unwrap_or(0);

        Ok(memberships.into_iter().nth(chosen))
    }

    pub async fn user_organizations(&self, user_id: Uuid) -> ApiResult<Vec<OrgMembership>> {
        Ok(db::organizations::memberships_for_user(&self.db, user_id).await?)
    }

    pub async fn user_role(&self, user_id: Uuid, org_id: Uuid) -> ApiResult<Option<Role>> {
        Ok(db::organizations::member_role(&self.db, user_id, org_id).await?)
    }

    /// Role of a member; `Forbidden` for non-members
    pub async fn require_member(&self, user_id: Uuid, org_id: Uuid) -> ApiResult<Role> {
        self.user_role(user_id, org_id)
            .await?
            .ok_or_else(|| ApiError::Forbidden("Not a member of this organization".to_string()))
    }

    /// Role of a member holding `permission`; `Forbidden` otherwise
    pub async fn require_permission(&self, user_id: Uuid, org_id: Uuid, permission: Permission) -> ApiResult<Role> {
        let role = self.require_member(user_id, org_id).await?;
        if !role.has_permission(permission) {
            return Err(ApiError::Forbidden(format!("Missing permission {}", permission)));
        }
        Ok(role)
    }

    /// Make `org_id` the user's active organization
    pub async fn switch(&self, user_id: Uuid, org_id: Uuid) -> ApiResult<()> {
        self.require_member(user_id, org_id).await?;
        db::users::set_active_org(&self.db, user_id, Some(org_id)).await?;
        info!(user_id = %user_id, org_id = %org_id, "Switched active organization");
        Ok(())
    }

    /// Issue a 7-day single-use invite
    pub async fn create_invite(&self, inviter: Uuid, org_id: Uuid, email: &str, role: Role) -> ApiResult<OrgInvite> {
        self.require_permission(inviter, org_id, Permission::MemberInvite).await?;

        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ApiError::Validation("A valid email is required".to_string()));
        }
        if role == Role::Owner {
            return Err(ApiError::Validation("Invites cannot grant the owner role".to_string()));
        }

        let allowance = self.subscriptions.can_add_member(org_id).await?;
        if !allowance.allowed {
            return Err(ApiError::Forbidden(allowance.reason.unwrap_or_default()));
        }

        let now = delve_common::time::now();
        let invite = OrgInvite {
            id: Uuid::new_v4(),
            org_id,
            code: generate_invite_code(),
            email: email.to_string(),
            role,
            expires_at: now + Duration::days(INVITE_TTL_DAYS),
            used_at: None,
            created_at: now,
        };
        db::invites::insert_invite(&self.db, &invite).await?;

        info!(org_id = %org_id, role = %role, "Invite created");
        Ok(invite)
    }

    /// Resolve an invite; fails when absent, used or expired
    pub async fn verify_invite(&self, code: &str) -> ApiResult<VerifiedInvite> {
        let invite = db::invites::find_by_code(&self.db, code)
            .await?
            .ok_or_else(|| ApiError::NotFound("Invite code does not exist".to_string()))?;

        if invite.used_at.is_some() {
            return Err(ApiError::Validation("Invite code has already been used".to_string()));
        }
        if !invite.is_usable_at(delve_common::time::now()) {
            return Err(ApiError::Validation("Invite code has expired".to_string()));
        }

        let organization = db::organizations::find_organization(&self.db, invite.org_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;

        Ok(VerifiedInvite { invite, organization })
    }

    /// Join the invite's organization with the invite's role
    ///
    /// The invite is consumed in the same transaction as the membership
    /// insert, guarded on `used_at IS NULL`, so a code admits one user.
    pub async fn accept_invite(&self, code: &str, user_id: Uuid) -> ApiResult<Organization> {
        let VerifiedInvite { invite, organization } = self.verify_invite(code).await?;

        if self.user_role(user_id, invite.org_id).await?.is_some() {
            return Err(ApiError::Validation(
                "Already a member of this organization".to_string(),
            ));
        }

        let allowance = self.subscriptions.can_add_member(invite.org_id).await?;
        if !allowance.allowed {
            return Err(ApiError::Forbidden(allowance.reason.unwrap_or_default()));
        }

        let now = delve_common::time::now();
        let joined = retry_on_lock("invite accept", self.max_lock_wait_ms, || async {
            let mut tx = self.db.begin().await?;
            if !db::invites::mark_used(&mut tx, invite.id, now).await? {
                return Ok(JoinOutcome::InviteUsed);
            }
            // Re-checked here: other joins may have filled the org since `can_add_member`
            if !db::organizations::insert_member_within_cap(
                &mut tx,
                invite.org_id,
                user_id,
                invite.role,
                allowance.limit,
            )
            .await?
            {
                return Ok(JoinOutcome::Full);
            }
            db::users::set_active_org(&mut *tx, user_id, Some(invite.org_id)).await?;
            tx.commit().await?;
            Ok::<_, delve_common::Error>(JoinOutcome::Joined)
        })
        .await?;

        match joined {
            JoinOutcome::Joined => {}
            JoinOutcome::InviteUsed => {
                return Err(ApiError::Validation("Invite code has already been used".to_string()))
            }
            JoinOutcome::Full => {
                return Err(ApiError::Forbidden(
                    "The organization has reached its plan's member limit".to_string(),
                ))
            }
        }

        info!(org_id = %invite.org_id, user_id = %user_id, role = %invite.role, "Invite accepted");
        self.publish_change(invite.org_id, "member_joined");
        Ok(organization)
    }

    /// Member listing; any member may view
    pub async fn list_members(&self, viewer: Uuid, org_id: Uuid) -> ApiResult<Vec<MemberInfo>> {
        self.require_member(viewer, org_id).await?;
        Ok(db::organizations::list_members(&self.db, org_id).await?)
    }

    /// Remove a member; the owner can never be removed
    pub async fn remove_member(&self, actor: Uuid, org_id: Uuid, target: Uuid) -> ApiResult<()> {
        self.require_permission(actor, org_id, Permission::MemberRemove).await?;

        match self.user_role(target, org_id).await? {
            None => return Err(ApiError::NotFound("Member not found".to_string())),
            Some(Role::Owner) => {
                return Err(ApiError::Forbidden(
                    "The organization owner cannot be removed".to_string(),
                ))
            }
            Some(_) => {}
        }

        let mut tx = self.db.begin().await?;
        let removed = db::organizations::delete_member(&mut tx, org_id, target).await?;
        db::organizations::clear_active_org(&mut tx, target, org_id).await?;
        tx.commit().await?;

        if !removed {
            return Err(ApiError::NotFound("Member not found".to_string()));
        }

        info!(org_id = %org_id, user_id = %target, "Member removed");
        self.publish_change(org_id, "member_removed");
        Ok(())
    }

    /// Change a member's role; owner role is never granted or revoked here
    pub async fn update_member_role(&self, actor: Uuid, org_id: Uuid, target: Uuid, role: Role) -> ApiResult<()> {
        self.require_permission(actor, org_id, Permission::MemberUpdateRole).await?;

        if role == Role::Owner {
            return Err(ApiError::Validation("The owner role cannot be assigned".to_string()));
        }
        match self.user_role(target, org_id).await? {
            None => return Err(ApiError::NotFound("Member not found".to_string())),
            Some(Role::Owner) => {
                return Err(ApiError::Forbidden(
                    "The organization owner's role cannot be changed".to_string(),
                ))
            }
            Some(_) => {}
        }

        if !db::organizations::update_member_role(&self.db, org_id, target, role).await? {
            return Err(ApiError::NotFound("Member not found".to_string()));
        }

        info!(org_id = %org_id, user_id = %target, role = %role, "Member role updated");
        self.publish_change(org_id, "member_role");
        Ok(())
    }

    fn publish_change(&self, org_id: Uuid, reason: &str) {
        self.event_bus.emit_lossy(DelveEvent::OrganizationChanged {
            org_id,
            reason: reason.to_string(),
            timestamp: delve_common::time::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_rules() {
        assert!(is_valid_slug("acme"));
        assert!(is_valid_slug("acme-research-2"));
        assert!(!is_valid_slug("a"));
        assert!(!is_valid_slug("Acme"));
        assert!(!is_valid_slug("acme_corp"));
        assert!(!is_valid_slug(&"a".repeat(49)));
    }

    #[test]
    fn test_invite_code_shape() {
        let code = generate_invite_code();
        assert_eq!(code.len(), INVITE_CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
