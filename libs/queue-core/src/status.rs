//! Status and classification enumerations
//!
//! Every enumeration is stored and serialized in SCREAMING_SNAKE_CASE so the
//! database, the REST payloads and the real-time events share one spelling.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(Error::InvalidEnum {
                        kind: $kind,
                        value: value.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

/// Lifecycle of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Waiting,
    Notified,
    InConsultation,
    Completed,
    Cancelled,
    NoShow,
}

string_enum!(QueueStatus, "queue status", {
    Waiting => "WAITING",
    Notified => "NOTIFIED",
    InConsultation => "IN_CONSULTATION",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
    NoShow => "NO_SHOW",
});

impl QueueStatus {
    /// Statuses that still hold a place in the queue.
    pub const ACTIVE: [QueueStatus; 3] = [
        QueueStatus::Waiting,
        QueueStatus::Notified,
        QueueStatus::InConsultation,
    ];

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            QueueStatus::Waiting | QueueStatus::Notified | QueueStatus::InConsultation
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Status implied by a 1-based queue position.
    pub fn for_position(position: i32) -> Self {
        match position {
            1 => QueueStatus::InConsultation,
            2 => QueueStatus::Notified,
            _ => QueueStatus::Waiting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

string_enum!(AppointmentStatus, "appointment status", {
    Scheduled => "SCHEDULED",
    Confirmed => "CONFIRMED",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
    NoShow => "NO_SHOW",
});

impl AppointmentStatus {
    /// Whether an appointment in this status occupies its doctor's time.
    pub fn blocks_slot(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled | AppointmentStatus::Confirmed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClinicKind {
    Clinic,
    Shop,
}

string_enum!(ClinicKind, "clinic kind", {
    Clinic => "CLINIC",
    Shop => "SHOP",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Plan {
    Free,
    Pro,
    Enterprise,
}

string_enum!(Plan, "plan", {
    Free => "FREE",
    Pro => "PRO",
    Enterprise => "ENTERPRISE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Cancelled,
}

string_enum!(SubscriptionStatus, "subscription status", {
    Trialing => "TRIALING",
    Active => "ACTIVE",
    PastDue => "PAST_DUE",
    Cancelled => "CANCELLED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    PlatformAdmin,
    Owner,
    Staff,
}

string_enum!(Role, "role", {
    PlatformAdmin => "PLATFORM_ADMIN",
    Owner => "OWNER",
    Staff => "STAFF",
});

impl Role {
    pub fn can_manage_clinic(&self) -> bool {
        matches!(self, Role::Owner | Role::PlatformAdmin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_to_status() {
        assert_eq!(QueueStatus::for_position(1), QueueStatus::InConsultation);
        assert_eq!(QueueStatus::for_position(2), QueueStatus::Notified);
        assert_eq!(QueueStatus::for_position(3), QueueStatus::Waiting);
        assert_eq!(QueueStatus::for_position(40), QueueStatus::Waiting);
    }

    #[test]
    fn test_active_set() {
        let active: Vec<_> = QueueStatus::ALL
            .iter()
            .filter(|s| s.is_active())
            .copied()
            .collect();
        assert_eq!(active, QueueStatus::ACTIVE.to_vec());
        assert!(QueueStatus::NoShow.is_terminal());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            "in_consultation".parse::<QueueStatus>().unwrap(),
            QueueStatus::InConsultation
        );
        assert_eq!(" past_due ".parse::<SubscriptionStatus>().unwrap(), SubscriptionStatus::PastDue);
        assert!("BOARDING".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn test_serde_spelling_matches_as_str() {
        for status in QueueStatus::ALL {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json.as_str(), Some(status.as_str()));
        }
        let role: Role = serde_json::from_str("\"PLATFORM_ADMIN\"").unwrap();
        assert_eq!(role, Role::PlatformAdmin);
    }

    #[test]
    fn test_slot_blocking_statuses() {
        assert!(AppointmentStatus::Scheduled.blocks_slot());
        assert!(AppointmentStatus::Confirmed.blocks_slot());
        assert!(!AppointmentStatus::Cancelled.blocks_slot());
        assert!(!AppointmentStatus::NoShow.blocks_slot());
    }
}
