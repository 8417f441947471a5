//! Logical namespaces of the state store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A logical partition of the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Fingerprint to last admitted sighting.
    Dedupe,
    /// Silence id to silence record.
    Silence,
    /// `route:minute-bucket` to admit counter.
    Rate,
    /// Append-only failed delivery records.
    Dlq,
}

impl Namespace {
    /// Every namespace, in a fixed order.
    pub const ALL: [Self; 4] = [Self::Dedupe, Self::Silence, Self::Rate, Self::Dlq];

    /// Returns the namespace name, also its value in the `namespace` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dedupe => "dedupe",
            Self::Silence => "silence",
            Self::Rate => "rate",
            Self::Dlq => "dlq",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
