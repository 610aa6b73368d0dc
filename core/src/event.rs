//! Customer events — the append-only history every decision is derived from.
//!
//! RULE: Events are never updated or deleted once written.
//! RULE: History is interpreted in ascending `event_date` order.

use crate::{
    engine::FlagInstance,
    error::{FlagError, FlagResult},
    types::{CustomerId, Timestamp},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt};

/// Canonical text form of every persisted timestamp.
/// Fixed width, so lexical order equals chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Keys the engine writes onto `flag_set` / `flag_synced_to_shopify` events.
pub const RESERVED_FLAG_KEYS: [&str; 5] = ["flag_type", "flag_variant", "tag_name", "priority", "party_id"];

/// Open key/value map of per-type event details.
pub type Attributes = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Checkin,
    DayPassPurchase,
    MembershipStarted,
    MembershipPurchase,
    MembershipRenewal,
    MembershipCancelled,
    EmailSent,
    FlagSet,
    FlagSyncedToShopify,
    BirthdayPartyBooked,
    BirthdayPartyRsvp,
    /// Any type ingestion writes that the engine has no rule for.
    Unknown(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Checkin             => "checkin",
            EventType::DayPassPurchase     => "day_pass_purchase",
            EventType::MembershipStarted   => "membership_started",
            EventType::MembershipPurchase  => "membership_purchase",
            EventType::MembershipRenewal   => "membership_renewal",
            EventType::MembershipCancelled => "membership_cancelled",
            EventType::EmailSent           => "email_sent",
            EventType::FlagSet             => "flag_set",
            EventType::FlagSyncedToShopify => "flag_synced_to_shopify",
            EventType::BirthdayPartyBooked => "birthday_party_booked",
            EventType::BirthdayPartyRsvp   => "birthday_party_rsvp",
            EventType::Unknown(s)          => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "checkin"                => EventType::Checkin,
            "day_pass_purchase"      => EventType::DayPassPurchase,
            "membership_started"     => EventType::MembershipStarted,
            "membership_purchase"    => EventType::MembershipPurchase,
            "membership_renewal"     => EventType::MembershipRenewal,
            "membership_cancelled"   => EventType::MembershipCancelled,
            "email_sent"             => EventType::EmailSent,
            "flag_set"               => EventType::FlagSet,
            "flag_synced_to_shopify" => EventType::FlagSyncedToShopify,
            "birthday_party_booked"  => EventType::BirthdayPartyBooked,
            "birthday_party_rsvp"    => EventType::BirthdayPartyRsvp,
            other                    => EventType::Unknown(other.to_string()),
        }
    }

    /// Membership lifecycle events (used for "recent membership activity" checks).
    pub fn is_membership_activity(&self) -> bool {
        matches!(
            self,
            EventType::MembershipStarted
                | EventType::MembershipPurchase
                | EventType::MembershipRenewal
                | EventType::MembershipCancelled
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        EventType::parse(&s)
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerEvent {
    pub customer_id: CustomerId,
    pub event_type:  EventType,
    pub event_date:  Timestamp,
    #[serde(default)]
    pub attributes:  Attributes,
}

impl CustomerEvent {
    pub fn new(customer_id: impl Into<CustomerId>, event_type: EventType, event_date: Timestamp) -> Self {
        Self {
            customer_id: customer_id.into(),
            event_type,
            event_date,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn is(&self, event_type: &EventType) -> bool {
        &self.event_type == event_type
    }

    /// String attribute, if present and a string.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Attribute rendered as text. Numbers and booleans are accepted;
    /// null, arrays and objects are not.
    pub fn attr_text(&self, key: &str) -> Option<String> {
        match self.attributes.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b)   => Some(b.to_string()),
            _                => None,
        }
    }

    /// Attribute value cloned for output data; absent keys become null.
    pub fn attr_or_null(&self, key: &str) -> Value {
        self.attributes.get(key).cloned().unwrap_or(Value::Null)
    }

    /// A required text attribute. Missing or non-scalar values are malformed.
    pub fn require_text(&self, key: &str) -> FlagResult<String> {
        self.attr_text(key)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| self.malformed(format!("missing attribute '{key}'")))
    }

    /// A required calendar-date attribute (`YYYY-MM-DD`, or a timestamp whose date is used).
    pub fn require_date(&self, key: &str) -> FlagResult<NaiveDate> {
        let raw = self.require_text(key)?;
        parse_timestamp(&raw)
            .map(|ts| ts.date())
            .ok_or_else(|| self.malformed(format!("attribute '{key}' is not a date: '{raw}'")))
    }

    /// An optional calendar-date attribute. Present-but-unparseable is still malformed.
    pub fn optional_date(&self, key: &str) -> FlagResult<Option<NaiveDate>> {
        match self.attr_text(key) {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(_) => self.require_date(key).map(Some),
        }
    }

    pub fn malformed(&self, reason: impl Into<String>) -> FlagError {
        FlagError::MalformedEvent {
            customer_id: self.customer_id.clone(),
            event_type:  self.event_type.to_string(),
            reason:      reason.into(),
        }
    }

    /// Base rule a `flag_set` / `flag_synced_to_shopify` event refers to.
    pub fn flag_type(&self) -> Option<&str> {
        self.attr_str("flag_type")
    }

    /// The `flag_set` event recorded when a new flag instance is written.
    pub fn flag_set(instance: &FlagInstance) -> Self {
        let mut event = CustomerEvent::new(instance.customer_id.clone(), EventType::FlagSet, instance.matched_at);
        event.attributes = instance.output_data.clone();
        event
            .with_attr("flag_type", instance.rule_name.clone())
            .with_attr("flag_variant", instance.flag_type.clone())
            .with_attr("tag_name", instance.tag_name())
            .with_attr("priority", instance.priority.as_str())
            .with_party(instance.party_id.as_deref())
    }

    /// The `flag_synced_to_shopify` event recorded after a successful tag add.
    pub fn flag_synced(
        customer_id: &str,
        rule_name: &str,
        tag_name: &str,
        party_id: Option<&str>,
        synced_at: Timestamp,
    ) -> Self {
        CustomerEvent::new(customer_id, EventType::FlagSyncedToShopify, synced_at)
            .with_attr("flag_type", rule_name)
            .with_attr("tag_name", tag_name)
            .with_party(party_id)
    }

    fn with_party(self, party_id: Option<&str>) -> Self {
        match party_id {
            Some(p) => self.with_attr("party_id", p),
            None    => self,
        }
    }
}

/// Stable sort by `event_date`; ties keep their store order.
pub fn sort_history(events: &mut [CustomerEvent]) {
    events.sort_by_key(|e| e.event_date);
}

pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Accepts the canonical format, space-separated datetimes, RFC 3339
/// (converted to naive UTC) and bare dates (midnight).
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let s = raw.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_event_types_round_trip_their_name() {
        let t = EventType::parse("gift_card_redeemed");
        assert_eq!(t, EventType::Unknown("gift_card_redeemed".into()));
        assert_eq!(t.as_str(), "gift_card_redeemed");
        assert_eq!(EventType::parse("checkin"), EventType::Checkin);
    }

    #[test]
    fn timestamps_parse_in_all_accepted_shapes() {
        let expected = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2026-03-01T09:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01 09:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01T09:30:00+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01T11:30:00+02:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2026-03-01"),
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp("next tuesday"), None);
        assert_eq!(parse_timestamp(&format_timestamp(&expected)), Some(expected));
    }

    #[test]
    fn missing_required_attribute_is_malformed() {
        let ts = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let e = CustomerEvent::new("c-1", EventType::BirthdayPartyBooked, ts).with_attr("party_date", "soon");
        assert!(matches!(e.require_text("party_id"), Err(FlagError::MalformedEvent { .. })));
        assert!(matches!(e.require_date("party_date"), Err(FlagError::MalformedEvent { .. })));
        assert!(e.optional_date("end_date").unwrap().is_none());
    }
}
