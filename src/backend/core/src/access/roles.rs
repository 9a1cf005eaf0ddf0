//! The role taxonomy and its capability matrix.
//!
//! | Role          | Core data writes | Reads                         | Annotations | Administration |
//! |---------------|------------------|-------------------------------|-------------|----------------|
//! | Subject       | own aggregates   | own aggregates                | no          | no             |
//! | Investigator  | no               | assigned scope, identified    | yes         | no             |
//! | Analyst       | no               | assigned scope, de-identified | no          | no             |
//! | Sponsor       | no               | all scopes                    | no          | yes            |
//! | Auditor       | no               | all scopes, plus export       | no          | no             |
//! | BreakGlass    | no               | all scopes, live grant only   | no          | no             |
//!
//! A caller holds exactly one role per activated context. There is no role
//! inheritance and no capability union across assignments.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How far a role's read capability reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadScope {
    /// Only aggregates the caller owns
    OwnAggregates,
    /// Only the single scope activated in the caller context
    AssignedScope,
    /// Every scope
    AllScopes,
}

/// The six roles the core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// Trial participant authoring their own records
    Subject,
    /// Site staff reviewing and querying identified data in their scope
    Investigator,
    /// Statistician reading de-identified data in their scope
    Analyst,
    /// Trial operator administering grants
    Sponsor,
    /// Compliance reviewer with read and export rights everywhere
    Auditor,
    /// Emergency access, usable only while a live grant exists
    BreakGlass,
}

impl RoleKind {
    pub const ALL: [RoleKind; 6] = [
        Self::Subject,
        Self::Investigator,
        Self::Analyst,
        Self::Sponsor,
        Self::Auditor,
        Self::BreakGlass,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Investigator => "investigator",
            Self::Analyst => "analyst",
            Self::Sponsor => "sponsor",
            Self::Auditor => "auditor",
            Self::BreakGlass => "break_glass",
        }
    }

    pub const fn read_scope(&self) -> ReadScope {
        match self {
            Self::Subject => ReadScope::OwnAggregates,
            Self::Investigator | Self::Analyst => ReadScope::AssignedScope,
            Self::Sponsor | Self::Auditor | Self::BreakGlass => ReadScope::AllScopes,
        }
    }

    /// Only subjects author clinical data.
    pub const fn may_write_core(&self) -> bool {
        matches!(self, Self::Subject)
    }

    /// Only investigators raise notes and data queries.
    pub const fn may_annotate(&self) -> bool {
        matches!(self, Self::Investigator)
    }

    /// Only sponsors grant and revoke access.
    pub const fn may_administer(&self) -> bool {
        matches!(self, Self::Sponsor)
    }

    /// Only auditors export full histories.
    pub const fn may_export(&self) -> bool {
        matches!(self, Self::Auditor)
    }

    /// Analysts never see direct identifiers.
    pub const fn deidentified_reads(&self) -> bool {
        matches!(self, Self::Analyst)
    }

    /// Break-glass is re-checked against a live grant on every call.
    pub const fn requires_live_grant(&self) -> bool {
        matches!(self, Self::BreakGlass)
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
