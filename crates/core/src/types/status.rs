//! Enumerations stored as single-letter codes.
//!
//! The database keeps the historical one-letter codes (`P`, `C`, `F` for
//! payment status, `B`, `S`, `G` for membership); the wire format uses the
//! readable snake-case names.

use serde::{Deserialize, Serialize};

/// Error returned when a stored code or a wire name is not recognised.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind}: {value}")]
pub struct InvalidChoice {
    /// Which enumeration was being parsed.
    pub kind: &'static str,
    /// The offending input.
    pub value: String,
}

/// Payment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Complete,
    Failed,
}

impl PaymentStatus {
    /// All statuses, in display order.
    pub const ALL: [Self; 3] = [Self::Pending, Self::Complete, Self::Failed];

    /// Storage code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Pending => "P",
            Self::Complete => "C",
            Self::Failed => "F",
        }
    }

    /// Human readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }

    /// Parse a storage code.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChoice` for anything other than `P`, `C` or `F`.
    pub fn from_code(code: &str) -> Result<Self, InvalidChoice> {
        Self::ALL
            .into_iter()
            .find(|status| status.code() == code)
            .ok_or_else(|| InvalidChoice {
                kind: "payment status",
                value: code.to_owned(),
            })
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Customer membership tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    #[default]
    Bronze,
    Silver,
    Gold,
}

impl Membership {
    /// All tiers, in display order.
    pub const ALL: [Self; 3] = [Self::Bronze, Self::Silver, Self::Gold];

    /// Storage code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Bronze => "B",
            Self::Silver => "S",
            Self::Gold => "G",
        }
    }

    /// Human readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Bronze => "Bronze",
            Self::Silver => "Silver",
            Self::Gold => "Gold",
        }
    }

    /// Parse a storage code.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChoice` for anything other than `B`, `S` or `G`.
    pub fn from_code(code: &str) -> Result<Self, InvalidChoice> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.code() == code)
            .ok_or_else(|| InvalidChoice {
                kind: "membership",
                value: code.to_owned(),
            })
    }
}

impl std::fmt::Display for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_codes() {
        assert_eq!(PaymentStatus::from_code("C").unwrap(), PaymentStatus::Complete);
        assert_eq!(PaymentStatus::Failed.code(), "F");
        assert!(PaymentStatus::from_code("X").is_err());
    }

    #[test]
    fn test_membership_codes() {
        assert_eq!(Membership::from_code("G").unwrap(), Membership::Gold);
        assert_eq!(Membership::default(), Membership::Bronze);
        let err = Membership::from_code("gold").unwrap_err();
        assert_eq!(err.to_string(), "invalid membership: gold");
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Complete).unwrap(),
            "\"complete\""
        );
        let tier: Membership = serde_json::from_str("\"silver\"").unwrap();
        assert_eq!(tier, Membership::Silver);
    }
}
