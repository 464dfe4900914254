//! Reviewer-facing types: feedback, decisions, privilege levels.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reviewer comment (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFeedback {
    pub reviewer: String,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

/// Explicit reviewer decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Privilege level supplied by the authorization collaborator.
///
/// Ordered: `Viewer < Reviewer < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeLevel {
    Viewer,
    #[serde(alias = "manager")]
    Reviewer,
    Admin,
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivilegeLevel::Viewer => write!(f, "viewer"),
            PrivilegeLevel::Reviewer => write!(f, "reviewer"),
            PrivilegeLevel::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for PrivilegeLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "viewer" => Ok(PrivilegeLevel::Viewer),
            // legacy role name
            "reviewer" | "manager" => Ok(PrivilegeLevel::Reviewer),
            "admin" => Ok(PrivilegeLevel::Admin),
            _ => anyhow::bail!("Unknown privilege level: {}", s),
        }
    }
}

/// A reviewer with an already-resolved privilege level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reviewer {
    pub name: String,
    pub privilege: PrivilegeLevel,
}

impl Reviewer {
    pub fn new(name: impl Into<String>, privilege: PrivilegeLevel) -> Self {
        Self {
            name: name.into(),
            privilege,
        }
    }

    /// Reviewer-or-above may decide
    pub fn can_decide(&self) -> bool {
        self.privilege >= PrivilegeLevel::Reviewer
    }
}
