//! Contribution change types as stored in `audit_details.change_type`

use serde::{Deserialize, Serialize};
use std::fmt;

/// Change type of a contribution's audit details
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContributionChangeType {
    Creation,
    Amendment,
    Modification,
    Synthesis,
    Deleted,
    Attestation,
    Unknown,
}

impl ContributionChangeType {
    pub const ALL: [ContributionChangeType; 7] = [
        ContributionChangeType::Creation,
        ContributionChangeType::Amendment,
        ContributionChangeType::Modification,
        ContributionChangeType::Synthesis,
        ContributionChangeType::Deleted,
        ContributionChangeType::Attestation,
        ContributionChangeType::Unknown,
    ];

    /// The database literal
    pub fn literal(&self) -> &'static str {
        match self {
            ContributionChangeType::Creation => "creation",
            ContributionChangeType::Amendment => "amendment",
            ContributionChangeType::Modification => "modification",
            ContributionChangeType::Synthesis => "synthesis",
            ContributionChangeType::Deleted => "deleted",
            ContributionChangeType::Attestation => "attestation",
            ContributionChangeType::Unknown => "Unknown",
        }
    }

    /// The openEHR terminology code (group "audit change type")
    pub fn code(&self) -> &'static str {
        match self {
            ContributionChangeType::Creation => "249",
            ContributionChangeType::Amendment => "250",
            ContributionChangeType::Modification => "251",
            ContributionChangeType::Synthesis => "252",
            ContributionChangeType::Deleted => "523",
            ContributionChangeType::Attestation => "666",
            ContributionChangeType::Unknown => "253",
        }
    }

    /// Look up by terminology code
    pub fn by_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    /// Look up by preferred term / value; `unknown` is accepted in lower case as well
    pub fn by_literal(value: &str) -> Option<Self> {
        if value == "unknown" {
            return Some(ContributionChangeType::Unknown);
        }
        Self::ALL.iter().copied().find(|c| c.literal() == value)
    }
}

impl fmt::Display for ContributionChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.literal())
    }
}
