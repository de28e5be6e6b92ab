//! Research sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of report requested; determines the credit cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchType {
    Summary,
    Analysis,
    Comparison,
}

impl ResearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchType::Summary => "summary",
            ResearchType::Analysis => "analysis",
            ResearchType::Comparison => "comparison",
        }
    }

    /// Human-readable name used in plan rejection messages
    pub fn display_name(&self) -> &'static str {
        match self {
            ResearchType::Summary => "Summary research",
            ResearchType::Analysis => "In-depth analysis",
            ResearchType::Comparison => "Comparison research",
        }
    }

    /// Fixed credit cost
    pub fn credit_cost(&self) -> i64 {
        match self {
            ResearchType::Summary => 10,
            ResearchType::Analysis => 25,
            ResearchType::Comparison => 30,
        }
    }
}

impl fmt::Display for ResearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResearchType {
    type Err = delve_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(ResearchType::Summary),
            "analysis" => Ok(ResearchType::Analysis),
            "comparison" => Ok(ResearchType::Comparison),
            other => Err(delve_common::Error::InvalidInput(format!(
                "Unknown research type: {}",
                other
            ))),
        }
    }
}

/// Cost lookup by raw type tag; `None` for unrecognized types
pub fn research_cost(research_type: &str) -> Option<i64> {
    research_type
        .parse::<ResearchType>()
        .ok()
        .map(|t| t.credit_cost())
}

/// Session lifecycle status
///
/// `Processing` is the only non-terminal state and is never re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStatus {
    Processing,
    Completed,
    Failed,
}

impl ResearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStatus::Processing => "processing",
            ResearchStatus::Completed => "completed",
            ResearchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResearchStatus::Processing)
    }
}

impl fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResearchStatus {
    type Err = delve_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(ResearchStatus::Processing),
            "completed" => Ok(ResearchStatus::Completed),
            "failed" => Ok(ResearchStatus::Failed),
            other => Err(delve_common::Error::InvalidInput(format!(
                "Unknown research status: {}",
                other
            ))),
        }
    }
}

/// One request-to-report lifecycle instance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchSession {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub query: String,
    #[serde(rename = "type")]
    pub research_type: ResearchType,
    pub status: ResearchStatus,
    pub credits_used: i64,
    /// Report on completion, error message on failure
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Runtime-only progress of an in-flight session (not persisted)
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchProgress {
    pub step: String,
    pub progress: u8,
    pub partial: Option<String>,
}

/// History row: session plus creator identity
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub session: ResearchSession,
    pub creator_name: Option<String>,
    pub creator_email: Option<String>,
}
