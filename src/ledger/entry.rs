//! Ledger records

use crate::error::{KeelError, KeelResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which lifecycle a ledger entry covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseGroup {
    Build,
    Release,
}

impl PhaseGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Release => "release",
        }
    }
}

impl fmt::Display for PhaseGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for PhaseGroup {
    type Err = KeelError;

    fn from_str(s: &str) -> KeelResult<Self> {
        match s {
            "build" => Ok(Self::Build),
            "release" => Ok(Self::Release),
            other => Err(KeelError::LedgerCorrupt(format!("unknown phase group '{other}'"))),
        }
    }
}

/// Status of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    /// Owned by a running invocation
    Claimed,
    Succeeded,
    Failed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Terminal entries are never claimed again (except an explicit retry of `Failed`)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Claimed)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = KeelError;

    fn from_str(s: &str) -> KeelResult<Self> {
        match s {
            "claimed" => Ok(Self::Claimed),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(KeelError::LedgerCorrupt(format!("unknown status '{other}'"))),
        }
    }
}

/// One row of the ledger, keyed by `(sha, group)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sha: String,
    pub group: PhaseGroup,
    pub status: ClaimStatus,
    pub owner_token: String,
    pub owner_pid: u32,
    /// Ref name the claim was made for
    pub reference: String,
    /// Who triggered the invocation
    pub actor: String,
    pub claimed_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of a claim attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This owner now holds the claim
    Won,
    /// The claim was held by a dead process and has been taken over
    Adopted { previous_owner: String },
    /// Someone else holds or finished the claim
    Lost(ClaimStatus),
}

impl ClaimOutcome {
    /// Whether the caller may run the phase group
    pub fn is_won(&self) -> bool {
        matches!(self, Self::Won | Self::Adopted { .. })
    }
}

pub(crate) fn parse_timestamp(value: &str) -> KeelResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| KeelError::LedgerCorrupt(format!("bad timestamp '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_and_displays() {
        for status in [ClaimStatus::Claimed, ClaimStatus::Succeeded, ClaimStatus::Failed] {
            assert_eq!(status.as_str().parse::<ClaimStatus>().unwrap(), status);
        }
        assert!("running".parse::<ClaimStatus>().is_err());
    }

    #[test]
    fn only_claimed_is_non_terminal() {
        assert!(!ClaimStatus::Claimed.is_terminal());
        assert!(ClaimStatus::Succeeded.is_terminal());
        assert!(ClaimStatus::Failed.is_terminal());
    }

    #[test]
    fn group_display() {
        assert_eq!(PhaseGroup::Build.to_string(), "build");
        assert_eq!("release".parse::<PhaseGroup>().unwrap(), PhaseGroup::Release);
    }

    #[test]
    fn adopted_counts_as_won() {
        assert!(ClaimOutcome::Won.is_won());
        assert!(ClaimOutcome::Adopted {
            previous_owner: "x".into()
        }
        .is_won());
        assert!(!ClaimOutcome::Lost(ClaimStatus::Claimed).is_won());
    }

    #[test]
    fn timestamp_roundtrip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&now.to_rfc3339()).unwrap();
        assert_eq!(parsed, now);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
