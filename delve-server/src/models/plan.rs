//! Subscription plans and credit packages
//!
//! Both tables are static configuration; only an organization's plan id is
//! persisted.

use super::research::ResearchType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Member cap meaning "no limit"
pub const UNLIMITED_MEMBERS: i64 = -1;

/// Plan tier; ordered free < pro < enterprise
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanId {
    Free,
    Pro,
    Enterprise,
}

impl PlanId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Free => "free",
            PlanId::Pro => "pro",
            PlanId::Enterprise => "enterprise",
        }
    }

    /// Static definition of this plan
    pub fn plan(&self) -> &'static Plan {
        match self {
            PlanId::Free => &FREE,
            PlanId::Pro => &PRO,
            PlanId::Enterprise => &ENTERPRISE,
        }
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanId {
    type Err = delve_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanId::Free),
            "pro" => Ok(PlanId::Pro),
            "enterprise" => Ok(PlanId::Enterprise),
            other => Err(delve_common::Error::InvalidInput(format!("Unknown plan: {}", other))),
        }
    }
}

/// Limits and entitlements of a plan
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFeatures {
    /// Member cap, [`UNLIMITED_MEMBERS`] for no cap
    pub members: i64,
    pub monthly_credits: i64,
    pub research_types: &'static [ResearchType],
    pub export_markdown: bool,
    pub priority_support: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: PlanId,
    pub name: &'static str,
    /// Monthly price in cents
    pub price: i64,
    pub features: PlanFeatures,
}

impl Plan {
    pub fn allows(&self, research_type: ResearchType) -> bool {
        self.features.research_types.contains(&research_type)
    }
}

const ALL_RESEARCH_TYPES: &[ResearchType] = &[
    ResearchType::Summary,
    ResearchType::Analysis,
    ResearchType::Comparison,
];

static FREE: Plan = Plan {
    id: PlanId::Free,
    name: "Free",
    price: 0,
    features: PlanFeatures {
        members: 3,
        monthly_credits: 500,
        research_types: &[ResearchType::Summary],
        export_markdown: false,
        priority_support: false,
    },
};

static PRO: Plan = Plan {
    id: PlanId::Pro,
    name: "Pro",
    price: 29900,
    features: PlanFeatures {
        members: 10,
        monthly_credits: 5000,
        research_types: ALL_RESEARCH_TYPES,
        export_markdown: true,
        priority_support: true,
    },
};

static ENTERPRISE: Plan = Plan {
    id: PlanId::Enterprise,
    name: "Enterprise",
    price: 99900,
    features: PlanFeatures {
        members: UNLIMITED_MEMBERS,
        monthly_credits: 20000,
        research_types: ALL_RESEARCH_TYPES,
        export_markdown: true,
        priority_support: true,
    },
};

/// Purchasable credit bundle
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditPackage {
    pub id: &'static str,
    pub credits: i64,
    pub bonus: i64,
    /// Price in cents
    pub price: i64,
}

impl CreditPackage {
    /// Credits granted on payment, bonus included
    pub fn total_credits(&self) -> i64 {
        self.credits + self.bonus
    }
}

pub static CREDIT_PACKAGES: [CreditPackage; 3] = [
    CreditPackage {
        id: "credits_1000",
        credits: 1000,
        bonus: 0,
        price: 9900,
    },
    CreditPackage {
        id: "credits_5000",
        credits: 5000,
        bonus: 500,
        price: 39900,
    },
    CreditPackage {
        id: "credits_20000",
        credits: 20000,
        bonus: 3000,
        price: 129900,
    },
];

pub fn find_package(id: &str) -> Option<&'static CreditPackage> {
    CREDIT_PACKAGES.iter().find(|p| p.id == id)
}
