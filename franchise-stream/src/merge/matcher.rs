//! Address equivalence strategies
//!
//! `Containment` is the compatibility behavior: two addresses are the same
//! place when one contains the other, ignoring case. It merges
//! "123 Main St" into "123 Main St, Denver, CO" but also folds "12 Main St"
//! into "112 Main St". `Normalized` is stricter and opt-in.

use franchise_common::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Street vocabulary folded to one spelling before comparison
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("av", "ave"),
    ("road", "rd"),
    ("boulevard", "blvd"),
    ("drive", "dr"),
    ("lane", "ln"),
    ("court", "ct"),
    ("place", "pl"),
    ("parkway", "pkwy"),
    ("highway", "hwy"),
    ("suite", "ste"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
];

/// Address equivalence predicate used by the fallback merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMatcher {
    /// Case-insensitive substring containment in either direction
    #[default]
    Containment,
    /// Equality of lower-cased alphanumeric tokens with street suffixes folded
    Normalized,
}

impl AddressMatcher {
    /// Whether `candidate` and `existing` denote the same location
    pub fn matches(&self, candidate: &str, existing: &str) -> bool {
        match self {
            AddressMatcher::Containment => {
                let candidate = candidate.to_lowercase();
                let existing = existing.to_lowercase();
                existing.contains(&candidate) || candidate.contains(&existing)
            }
            AddressMatcher::Normalized => {
                let candidate = normalize_address(candidate);
                !candidate.is_empty() && candidate == normalize_address(existing)
            }
        }
    }
}

impl FromStr for AddressMatcher {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "containment" => Ok(AddressMatcher::Containment),
            "normalized" => Ok(AddressMatcher::Normalized),
            other => Err(Error::Config(format!(
                "Unknown address matcher '{}' (expected 'containment' or 'normalized')",
                other
            ))),
        }
    }
}

impl fmt::Display for AddressMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressMatcher::Containment => f.write_str("containment"),
            AddressMatcher::Normalized => f.write_str("normalized"),
        }
    }
}

/// Canonical token form of an address
pub fn normalize_address(address: &str) -> String {
    address
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| {
            ABBREVIATIONS
                .iter()
                .find(|(long, _)| *long == token)
                .map(|(_, short)| *short)
                .unwrap_or(token)
        })
        .collect::<Vec<_>>()
        .join(" ")
}
