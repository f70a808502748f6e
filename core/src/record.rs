//! Wire types for gateway batch uploads.
//!
//! Gateways are inconsistent about timestamps: some send epoch seconds
//! (as a number or a numeric string), newer firmware sends RFC3339.
//! [`FlexibleTime`] accepts all three.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One record in a gateway batch upload.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRecord {
    /// Gateway idempotency key. Synthesized when absent.
    #[serde(default)]
    pub record_id: Option<String>,
    pub card_id: String,
    pub board_time: FlexibleTime,
    /// Free-text station token: station code or station name.
    pub board_station: String,
    #[serde(default)]
    pub alight_time: Option<FlexibleTime>,
    #[serde(default)]
    pub alight_station: Option<String>,
    #[serde(default)]
    pub route_id: Option<i64>,
    #[serde(default)]
    pub gateway_id: Option<String>,
}

impl BatchRecord {
    pub fn gateway(&self) -> &str {
        self.gateway_id.as_deref().unwrap_or("")
    }
}

/// Timestamp accepting epoch seconds or RFC3339.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlexibleTime(pub DateTime<Utc>);

impl From<DateTime<Utc>> for FlexibleTime {
    fn from(t: DateTime<Utc>) -> Self {
        FlexibleTime(t)
    }
}

impl<'de> Deserialize<'de> for FlexibleTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(FlexibleTimeVisitor)
    }
}

struct FlexibleTimeVisitor;

impl<'de> Visitor<'de> for FlexibleTimeVisitor {
    type Value = FlexibleTime;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("epoch seconds or an RFC3339 timestamp")
    }

    fn visit_i64<E: de::Error>(self, secs: i64) -> Result<FlexibleTime, E> {
        epoch_secs(secs)
    }

    fn visit_u64<E: de::Error>(self, secs: u64) -> Result<FlexibleTime, E> {
        let secs = i64::try_from(secs)
            .map_err(|_| E::custom(format!("epoch seconds out of range: {secs}")))?;
        epoch_secs(secs)
    }

    fn visit_f64<E: de::Error>(self, secs: f64) -> Result<FlexibleTime, E> {
        epoch_secs(secs as i64)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<FlexibleTime, E> {
        if let Ok(secs) = value.parse::<i64>() {
            return epoch_secs(secs);
        }
        DateTime::parse_from_rfc3339(value)
            .map(|t| FlexibleTime(t.with_timezone(&Utc)))
            .map_err(|_| E::custom(format!("invalid time format: {value}")))
    }
}

fn epoch_secs<E: de::Error>(secs: i64) -> Result<FlexibleTime, E> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(FlexibleTime)
        .ok_or_else(|| E::custom(format!("epoch seconds out of range: {secs}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn parse(json: &str) -> BatchRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn board_time_from_epoch_number() {
        let r = parse(r#"{"card_id":"C1","board_time":1700000000,"board_station":"S1"}"#);
        assert_eq!(r.board_time.0.timestamp(), 1_700_000_000);
    }

    #[test]
    fn board_time_from_epoch_string() {
        let r = parse(r#"{"card_id":"C1","board_time":"1700000000","board_station":"S1"}"#);
        assert_eq!(r.board_time.0.timestamp(), 1_700_000_000);
    }

    #[test]
    fn board_time_from_rfc3339() {
        let r = parse(
            r#"{"card_id":"C1","board_time":"2024-03-01T08:30:00+08:00","board_station":"S1"}"#,
        );
        assert_eq!(r.board_time.0.hour(), 0); // 08:30 +08:00 is 00:30 UTC
        assert_eq!(r.board_time.0.minute(), 30);
    }

    #[test]
    fn malformed_time_is_an_error() {
        let result: Result<BatchRecord, _> = serde_json::from_str(
            r#"{"card_id":"C1","board_time":"yesterday","board_station":"S1"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn optional_fields_default() {
        let r = parse(r#"{"card_id":"C1","board_time":1700000000,"board_station":"S1"}"#);
        assert!(r.record_id.is_none());
        assert!(r.alight_time.is_none());
        assert!(r.alight_station.is_none());
        assert!(r.route_id.is_none());
        assert_eq!(r.gateway(), "");
    }
}
