//! Lifecycle phases and the two fixed phase sequences

use crate::ledger::PhaseGroup;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A lifecycle phase a plugin may hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Configure,
    PreBuild,
    Build,
    PostBuild,
    PreRelease,
    Release,
    PostRelease,
}

const BUILD_SEQUENCE: [Phase; 4] = [
    Phase::Configure,
    Phase::PreBuild,
    Phase::Build,
    Phase::PostBuild,
];

const RELEASE_SEQUENCE: [Phase; 4] = [
    Phase::Configure,
    Phase::PreRelease,
    Phase::Release,
    Phase::PostRelease,
];

impl Phase {
    /// Every phase, in declaration order
    pub const ALL: [Phase; 7] = [
        Phase::Configure,
        Phase::PreBuild,
        Phase::Build,
        Phase::PostBuild,
        Phase::PreRelease,
        Phase::Release,
        Phase::PostRelease,
    ];

    /// Ordered phases run for a phase group
    pub fn sequence(group: PhaseGroup) -> &'static [Phase] {
        match group {
            PhaseGroup::Build => &BUILD_SEQUENCE,
            PhaseGroup::Release => &RELEASE_SEQUENCE,
        }
    }

    /// Phases a plugin must implement
    pub fn is_mandatory(&self) -> bool {
        matches!(self, Self::Configure | Self::Build | Self::Release)
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Configure => 0,
            Self::PreBuild => 1,
            Self::Build => 2,
            Self::PostBuild => 3,
            Self::PreRelease => 4,
            Self::Release => 5,
            Self::PostRelease => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::PreBuild => "pre_build",
            Self::Build => "build",
            Self::PostBuild => "post_build",
            Self::PreRelease => "pre_release",
            Self::Release => "release",
            Self::PostRelease => "post_release",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
