//! Shared primitive types used across the engine.

/// A card UID as printed on the physical card.
pub type CardId = String;

/// Internal numeric id of a route row.
pub type RouteId = i64;

/// Internal numeric id of a station row.
pub type StationId = i64;

/// Trip lifecycle status. Closed set; every transition site matches
/// exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripStatus {
    Pending,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TripStatus::Pending => "pending",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TripStatus::Pending),
            "completed" => Some(TripStatus::Completed),
            "cancelled" => Some(TripStatus::Cancelled),
            _ => None,
        }
    }
}

/// Route pricing mode. Unknown values from config fall back to Uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FareType {
    Uniform,
    Segment,
    Distance,
}

impl FareType {
    pub fn parse(s: &str) -> Self {
        match s {
            "segment" => FareType::Segment,
            "distance" => FareType::Distance,
            _ => FareType::Uniform,
        }
    }
}

/// Route tap mode: single_tap prices on boarding, tap_in_out waits for
/// the alight tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapMode {
    SingleTap,
    TapInOut,
}

impl TapMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "tap_in_out" => TapMode::TapInOut,
            _ => TapMode::SingleTap,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TapMode::SingleTap => "single_tap",
            TapMode::TapInOut => "tap_in_out",
        }
    }
}
