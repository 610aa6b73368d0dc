//! Built-in flag rules and the event predicates they share.

mod day_pass;
mod email;
mod membership;
mod party;

pub use day_pass::{FirstTimeDayPassOffer, ReadyForMembership, SecondVisit2wkOffer, SecondVisitOfferEligible};
pub use email::FiftyPercentOfferSent;
pub use membership::{ActiveMembership, ActivePrepaidPass, HasYouth, MembershipCancelledWinback, NewMember, TwoWeekPassPurchase};
pub use party::{AttendeeOneWeekOut, HostOneWeekOut, HostSixDaysOut};

use crate::{
    catalogue::{FlagRule, RuleContext},
    event::{CustomerEvent, EventType},
};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;

pub const FIRST_TIME_DAY_PASS_2WK_OFFER: &str = "first_time_day_pass_2wk_offer";
pub const SECOND_VISIT_OFFER_ELIGIBLE: &str = "second_visit_offer_eligible";
pub const SECOND_VISIT_2WK_OFFER: &str = "second_visit_2wk_offer";
pub const READY_FOR_MEMBERSHIP: &str = "ready_for_membership";
pub const MEMBERSHIP_CANCELLED_WINBACK: &str = "membership_cancelled_winback";
pub const NEW_MEMBER: &str = "new_member";
pub const HOST_ONE_WEEK_OUT: &str = "birthday_party_host_one_week_out";
pub const HOST_SIX_DAYS_OUT: &str = "birthday_party_host_six_days_out";
pub const ATTENDEE_ONE_WEEK_OUT: &str = "birthday_party_attendee_one_week_out";
pub const FIFTY_PERCENT_OFFER_SENT: &str = "fifty_percent_offer_sent";
pub const TWO_WEEK_PASS_PURCHASE: &str = "2_week_pass_purchase";
pub const ACTIVE_MEMBERSHIP: &str = "active_membership";
pub const ACTIVE_PREPAID_PASS: &str = "active_prepaid_pass";
pub const HAS_YOUTH: &str = "has_youth";

const DAY_PASS_MARKER: &str = "day pass";
const PREPAID_PASS_KEYWORDS: [&str; 3] = ["2-week", "2 week", "two week"];
const YOUTH_KEYWORDS: [&str; 5] = ["youth", "family", "junior", "kid", "child"];

/// The full built-in catalogue, in tie-break order.
pub fn standard_rules() -> Vec<Box<dyn FlagRule>> {
    vec![
        Box::new(FirstTimeDayPassOffer),
        Box::new(SecondVisitOfferEligible),
        Box::new(SecondVisit2wkOffer),
        Box::new(ReadyForMembership),
        Box::new(MembershipCancelledWinback),
        Box::new(NewMember),
        Box::new(HostOneWeekOut),
        Box::new(HostSixDaysOut),
        Box::new(AttendeeOneWeekOut),
        Box::new(FiftyPercentOfferSent),
        Box::new(TwoWeekPassPurchase),
        Box::new(ActiveMembership),
        Box::new(ActivePrepaidPass),
        Box::new(HasYouth),
    ]
}

pub(crate) fn is_day_pass_checkin(e: &CustomerEvent) -> bool {
    e.is(&EventType::Checkin)
        && e.attr_str("entry_method_description")
            .map_or(false, |d| d.to_lowercase().contains(DAY_PASS_MARKER))
}

pub(crate) fn is_prepaid_pass(name: &str) -> bool {
    contains_any(name, &PREPAID_PASS_KEYWORDS)
}

pub(crate) fn is_youth_membership(name: &str) -> bool {
    contains_any(name, &YOUTH_KEYWORDS)
}

fn contains_any(name: &str, keywords: &[&str]) -> bool {
    let lower = name.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// Latest of purchase / renewal / cancellation is not a cancellation.
pub(crate) fn is_active_member(ctx: &RuleContext<'_>) -> bool {
    ctx.history
        .iter()
        .filter(|e| {
            matches!(
                e.event_type,
                EventType::MembershipPurchase | EventType::MembershipRenewal | EventType::MembershipCancelled
            )
        })
        .last()
        .map_or(false, |e| !e.is(&EventType::MembershipCancelled))
}

/// Whole days from `from` to `to`.
pub(crate) fn day_count(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

pub(crate) fn date_value(date: NaiveDate) -> Value {
    Value::String(date.format("%Y-%m-%d").to_string())
}

/// A membership whose latest lifecycle event is not a cancellation and
/// whose end date, when recorded, has not passed.
pub(crate) struct OpenMembership<'a> {
    pub id:     String,
    pub name:   String,
    pub latest: &'a CustomerEvent,
}

pub(crate) fn open_memberships<'a>(ctx: &RuleContext<'a>, rule: &str) -> Vec<OpenMembership<'a>> {
    let mut by_id: BTreeMap<String, Vec<&'a CustomerEvent>> = BTreeMap::new();
    for e in ctx.history.iter().filter(|e| e.event_type.is_membership_activity()) {
        let key = e
            .attr_text("membership_id")
            .or_else(|| e.attr_text("membership_name"))
            .unwrap_or_default();
        by_id.entry(key).or_default().push(e);
    }

    let mut open = Vec::new();
    for (id, events) in by_id {
        let Some(latest) = events.last().copied() else { continue };
        if latest.is(&EventType::MembershipCancelled) {
            continue;
        }
        match latest.optional_date("end_date") {
            Err(err) => {
                ctx.skip_malformed(rule, err);
                continue;
            }
            Ok(Some(end)) if end < ctx.today() => continue,
            Ok(_) => {}
        }
        let name = events
            .iter()
            .rev()
            .find_map(|e| e.attr_text("membership_name"))
            .unwrap_or_default();
        open.push(OpenMembership { id, name, latest });
    }
    open
}
