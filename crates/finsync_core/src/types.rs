//! Identifiers, record types and timestamps.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Identifier of the user that owns a record.
///
/// Always taken from an authenticated principal on the server; a `userId`
/// carried inside a submitted record is never trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated, opaque record identifier.
///
/// Stable across devices and never regenerated by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a record ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random ID (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the empty ID, which is never valid on the wire.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The record families that take part in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    /// Income and expense entries.
    Transaction,
    /// Installment loans with their payment ledger.
    Loan,
}

impl RecordType {
    /// Every record type, in wire order.
    pub const ALL: [RecordType; 2] = [RecordType::Transaction, RecordType::Loan];

    /// Collection name used for the change block and the REST path.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Transaction => "transactions",
            Self::Loan => "loans",
        }
    }

    /// Response key carrying the tombstoned IDs of this type.
    #[must_use]
    pub const fn deleted_key(self) -> &'static str {
        match self {
            Self::Transaction => "deletedTransactions",
            Self::Loan => "deletedLoans",
        }
    }

    /// Looks a record type up by its collection name.
    #[must_use]
    pub fn from_collection(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.collection() == name)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// A UTC instant with millisecond precision.
///
/// Serialized as an RFC 3339 string such as `2026-01-15T09:30:00.000Z`.
/// Ordering is by instant; two strings that name the same instant in
/// different offsets compare equal once parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

/// The change cursor a client holds: everything with `updatedAt` at or
/// before it has been seen.
pub type Cursor = Timestamp;

impl Timestamp {
    /// The Unix epoch. A missing cursor means this value (full resync).
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from milliseconds since the Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since the Unix epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Converts a chrono date-time, dropping sub-millisecond precision.
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    /// Returns the instant as a chrono date-time, if it is representable.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    /// Parses an RFC 3339 timestamp, or a bare `YYYY-MM-DD` date (midnight UTC).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTimestamp`] if the input is neither.
    pub fn parse(value: &str) -> CoreResult<Self> {
        let trimmed = value.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::from_datetime(dt.with_timezone(&Utc)));
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Self::from_datetime(naive.and_utc()))
            .ok_or_else(|| CoreError::invalid_timestamp(value))
    }

    /// Formats as RFC 3339 in UTC with millisecond precision.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        match self.to_datetime() {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            None => format!("@{}ms", self.0),
        }
    }

    /// The next representable instant.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns `self + duration`, saturating.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Returns `self - duration`, saturating.
    #[must_use]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl FromStr for Timestamp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use proptest::prelude::*;

    #[test]
    fn epoch_formats_like_javascript() {
        assert_eq!(Timestamp::EPOCH.to_rfc3339(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn parse_compares_instants_not_strings() {
        let utc = Timestamp::parse("2026-01-15T10:00:00.000Z").unwrap();
        let offset = Timestamp::parse("2026-01-15T12:00:00+02:00").unwrap();
        assert_eq!(utc, offset);

        // Lexically larger, chronologically earlier.
        let later = Timestamp::parse("2026-01-15T09:00:00Z").unwrap();
        let earlier = Timestamp::parse("2026-01-15T10:00:00+05:00").unwrap();
        assert!(earlier < later);
    }

    #[test]
    fn parse_accepts_bare_dates() {
        let ts = Timestamp::parse("2026-03-01").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-03-01T00:00:00.000Z");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            Timestamp::parse("last tuesday"),
            Err(CoreError::InvalidTimestamp { .. })
        ));
        assert!("".parse::<Timestamp>().is_err());
    }

    #[test]
    fn sub_millisecond_precision_is_dropped() {
        let ts = Timestamp::parse("2026-01-15T10:00:00.123999Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-15T10:00:00.123Z");
    }

    #[test]
    fn serde_uses_rfc3339_strings() {
        let ts = Timestamp::from_millis(1_768_471_200_000);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2026-01-15T10:00:00.000Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
        assert!(serde_json::from_str::<Timestamp>("\"soon\"").is_err());
    }

    #[test]
    fn duration_arithmetic_saturates() {
        let ts = Timestamp::from_millis(5_000);
        assert_eq!(ts.saturating_sub(Duration::from_secs(2)).as_millis(), 3_000);
        assert_eq!(ts.saturating_add(Duration::from_millis(1)), ts.next());
        assert_eq!(
            Timestamp::from_millis(i64::MAX).saturating_add(Duration::from_secs(1)),
            Timestamp::from_millis(i64::MAX)
        );
    }

    // Years 0001 through 9999, so every offset rendering stays four digits.
    const DAY: i64 = 86_400_000;
    const FOUR_DIGIT_YEARS: std::ops::RangeInclusive<i64> =
        -62_135_596_800_000 + DAY..=253_402_300_799_999 - DAY;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn rfc3339_text_parses_back(millis in FOUR_DIGIT_YEARS) {
            let ts = Timestamp::from_millis(millis);
            prop_assert_eq!(Timestamp::parse(&ts.to_rfc3339()).unwrap(), ts);
        }

        #[test]
        fn any_offset_names_the_same_instant(
            millis in FOUR_DIGIT_YEARS,
            offset_minutes in -(14 * 60)..=(14 * 60),
        ) {
            let ts = Timestamp::from_millis(millis);
            let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap();
            let local = ts.to_datetime().unwrap().with_timezone(&offset);
            prop_assert_eq!(Timestamp::parse(&local.to_rfc3339()).unwrap(), ts);
        }

        #[test]
        fn utc_text_sorts_like_instants(a in FOUR_DIGIT_YEARS, b in FOUR_DIGIT_YEARS) {
            let (a, b) = (Timestamp::from_millis(a), Timestamp::from_millis(b));
            prop_assert_eq!(a.to_rfc3339().cmp(&b.to_rfc3339()), a.cmp(&b));
        }
    }

    #[test]
    fn record_type_names() {
        assert_eq!(RecordType::Transaction.collection(), "transactions");
        assert_eq!(RecordType::Loan.deleted_key(), "deletedLoans");
        assert_eq!(RecordType::from_collection("loans"), Some(RecordType::Loan));
        assert_eq!(RecordType::from_collection("users"), None);
    }

    #[test]
    fn record_id_emptiness() {
        assert!(RecordId::new("  ").is_empty());
        assert!(!RecordId::generate().is_empty());
        assert_ne!(RecordId::generate(), RecordId::generate());
    }
}
