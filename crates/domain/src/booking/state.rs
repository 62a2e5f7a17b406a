use serde::{Deserialize, Serialize};

/// Lifecycle status of a booking.
///
/// ```text
/// PENDING ──► CONFIRMED ──► COMPLETED
///    │  │          │
///    │  └──────────┴──► CANCELLED
///    └──► REJECTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    #[default]
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn can_confirm(&self) -> bool {
        matches!(self, BookingStatus::Pending)
    }

    pub fn can_reject(&self) -> bool {
        matches!(self, BookingStatus::Pending)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Cancelled | BookingStatus::Completed
        )
    }

    /// Whether the booking's nights stay held on the calendar.
    pub fn holds_inventory(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Rejected => "REJECTED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Rejected,
        BookingStatus::Cancelled,
        BookingStatus::Completed,
    ];

    #[test]
    fn only_pending_and_confirmed_hold_inventory() {
        let holding: Vec<_> = ALL.into_iter().filter(|s| s.holds_inventory()).collect();
        assert_eq!(holding, vec![BookingStatus::Pending, BookingStatus::Confirmed]);
    }

    #[test]
    fn terminal_states_allow_nothing() {
        for status in ALL.into_iter().filter(BookingStatus::is_terminal) {
            assert!(!status.can_confirm());
            assert!(!status.can_reject());
            assert!(!status.can_cancel());
            assert!(!status.can_complete());
        }
    }

    #[test]
    fn serializes_in_upper_case() {
        assert_eq!(
            serde_json::to_string(&BookingStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
        assert_eq!(BookingStatus::Confirmed.to_string(), "CONFIRMED");
    }
}
