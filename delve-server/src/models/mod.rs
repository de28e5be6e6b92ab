//! Data models

pub mod credits;
pub mod order;
pub mod organization;
pub mod plan;
pub mod research;
pub mod subscription;
pub mod user;

pub use credits::{Actor, CreditTransaction, TransactionType};
pub use order::{Order, OrderStatus};
pub use organization::{MemberInfo, OrgInvite, OrgMembership, Organization, Permission, Role};
pub use plan::{CreditPackage, Plan, PlanId};
pub use research::{HistoryEntry, ResearchProgress, ResearchSession, ResearchStatus, ResearchType};
pub use subscription::OrgSubscription;
pub use user::User;
