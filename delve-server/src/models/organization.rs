//! Organizations, memberships, roles and permissions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Role of a user within one organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

/// Capability checked before a state-changing or org-scoped operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "member:invite")]
    MemberInvite,
    #[serde(rename = "member:remove")]
    MemberRemove,
    #[serde(rename = "member:update_role")]
    MemberUpdateRole,
    #[serde(rename = "credits:purchase")]
    CreditsPurchase,
    #[serde(rename = "credits:view")]
    CreditsView,
    #[serde(rename = "research:create")]
    ResearchCreate,
    #[serde(rename = "research:view_all")]
    ResearchViewAll,
    #[serde(rename = "research:delete_all")]
    ResearchDeleteAll,
    #[serde(rename = "research:delete_own")]
    ResearchDeleteOwn,
}

const OWNER_PERMISSIONS: &[Permission] = &[
    Permission::MemberInvite,
    Permission::MemberRemove,
    Permission::MemberUpdateRole,
    Permission::CreditsPurchase,
    Permission::CreditsView,
    Permission::ResearchCreate,
    Permission::ResearchViewAll,
    Permission::ResearchDeleteAll,
    Permission::ResearchDeleteOwn,
];

const ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::MemberInvite,
    Permission::MemberRemove,
    Permission::CreditsPurchase,
    Permission::CreditsView,
    Permission::ResearchCreate,
    Permission::ResearchViewAll,
    Permission::ResearchDeleteOwn,
];

const MEMBER_PERMISSIONS: &[Permission] = &[
    Permission::CreditsView,
    Permission::ResearchCreate,
    Permission::ResearchViewAll,
    Permission::ResearchDeleteOwn,
];

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    /// Capability set granted to this role
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Owner => OWNER_PERMISSIONS,
            Role::Admin => ADMIN_PERMISSIONS,
            Role::Member => MEMBER_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = delve_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(delve_common::Error::InvalidInput(format!("Unknown role: {}", other))),
        }
    }
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::MemberInvite => "member:invite",
            Permission::MemberRemove => "member:remove",
            Permission::MemberUpdateRole => "member:update_role",
            Permission::CreditsPurchase => "credits:purchase",
            Permission::CreditsView => "credits:view",
            Permission::ResearchCreate => "research:create",
            Permission::ResearchViewAll => "research:view_all",
            Permission::ResearchDeleteAll => "research:delete_all",
            Permission::ResearchDeleteOwn => "research:delete_own",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// Immutable, unique
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An organization as seen by one of its members
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgMembership {
    #[serde(flatten)]
    pub organization: Organization,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// Member listing row
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// Single-use invitation token
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgInvite {
    pub id: Uuid,
    pub org_id: Uuid,
    pub code: String,
    pub email: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OrgInvite {
    /// Usable: not yet consumed and not past expiry
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_has_every_permission() {
        for permission in OWNER_PERMISSIONS {
            assert!(Role::Owner.has_permission(*permission));
        }
        assert!(Role::Owner.has_permission(Permission::ResearchDeleteAll));
    }

    #[test]
    fn test_admin_cannot_delete_all_or_change_roles() {
        assert!(!Role::Admin.has_permission(Permission::ResearchDeleteAll));
        assert!(!Role::Admin.has_permission(Permission::MemberUpdateRole));
        assert!(Role::Admin.has_permission(Permission::ResearchDeleteOwn));
        assert!(Role::Admin.has_permission(Permission::CreditsPurchase));
    }

    #[test]
    fn test_member_permissions() {
        assert!(Role::Member.has_permission(Permission::ResearchCreate));
        assert!(Role::Member.has_permission(Permission::CreditsView));
        assert!(!Role::Member.has_permission(Permission::CreditsPurchase));
        assert!(!Role::Member.has_permission(Permission::MemberInvite));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("superuser".parse::<Role>().is_err());
        assert_eq!(Role::Owner.to_string(), "owner");
    }

    #[test]
    fn test_permission_serializes_as_tag() {
        let json = serde_json::to_string(&Permission::ResearchDeleteOwn).unwrap();
        assert_eq!(json, "\"research:delete_own\"");
    }
}
