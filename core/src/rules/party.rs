//! Birthday-party reminder rules.
//!
//! RULE: These rules are per party. Cooldowns key on (customer, rule, party_id),
//! so one customer may be flagged again for a different party.

use super::{date_value, day_count, ATTENDEE_ONE_WEEK_OUT, HOST_ONE_WEEK_OUT, HOST_SIX_DAYS_OUT};
use crate::{
    catalogue::{FlagRule, Priority, RuleContext, RuleMatch, RuleParams},
    error::FlagResult,
    event::{Attributes, CustomerEvent, EventType},
};
use chrono::Duration;
use serde_json::Value;

pub(crate) fn is_attending(e: &CustomerEvent) -> bool {
    match e.attributes.get("attending") {
        Some(Value::Bool(b))   => *b,
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "yes" | "true" | "y"),
        _                      => false,
    }
}

fn any_event(_: &CustomerEvent) -> bool {
    true
}

/// An event of `event_type` whose `party_date` is exactly `days_out` from
/// today. A party not yet flagged by this rule wins over one already flagged,
/// so two parties on the same date are each flagged in turn. Events with an
/// unreadable date or party id are skipped.
fn party_on(
    ctx: &RuleContext<'_>,
    rule: &str,
    event_type: &EventType,
    days_out: i64,
    qualifies: fn(&CustomerEvent) -> bool,
) -> Option<RuleMatch> {
    let target = ctx.today() + Duration::days(days_out);
    let mut first = None;
    for e in ctx.events(event_type).filter(|e| qualifies(e)) {
        let party_date = match e.require_date("party_date") {
            Ok(d) => d,
            Err(err) => {
                ctx.skip_malformed(rule, err);
                continue;
            }
        };
        if party_date != target {
            continue;
        }
        let party_id = match e.require_text("party_id") {
            Ok(id) => id,
            Err(err) => {
                ctx.skip_malformed(rule, err);
                continue;
            }
        };
        if ctx.cooldown.latest_flag_set(rule, Some(&party_id)).is_none() {
            return Some(RuleMatch::for_party(party_id, vec![e.clone()]));
        }
        first.get_or_insert_with(|| RuleMatch::for_party(party_id, vec![e.clone()]));
    }
    first
}

fn party_output(ctx: &RuleContext<'_>, rule: &str, matched: &RuleMatch) -> FlagResult<Attributes> {
    let e = matched.primary(rule)?;
    let party_date = e.require_date("party_date")?;
    let mut out = Attributes::new();
    out.insert(
        "party_id".into(),
        matched.party_id.clone().map_or(Value::Null, Value::String),
    );
    out.insert("party_date".into(), date_value(party_date));
    out.insert("days_until_party".into(), day_count(ctx.today(), party_date).into());
    out.insert("child_name".into(), e.attr_or_null("child_name"));
    out.insert("party_time".into(), e.attr_or_null("party_time"));
    Ok(out)
}

pub struct HostOneWeekOut;

impl FlagRule for HostOneWeekOut {
    fn params(&self) -> RuleParams {
        RuleParams::new(HOST_ONE_WEEK_OUT, "Hosting a birthday party in one week", Priority::High)
            .flag_cooldown(7)
            .expires_after(14)
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        Ok(party_on(ctx, HOST_ONE_WEEK_OUT, &EventType::BirthdayPartyBooked, 7, any_event))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, matched: &RuleMatch) -> FlagResult<Attributes> {
        let mut out = party_output(ctx, HOST_ONE_WEEK_OUT, matched)?;
        out.insert("total_guests".into(), matched.primary(HOST_ONE_WEEK_OUT)?.attr_or_null("total_guests"));
        Ok(out)
    }
}

pub struct HostSixDaysOut;

impl FlagRule for HostSixDaysOut {
    fn params(&self) -> RuleParams {
        RuleParams::new(HOST_SIX_DAYS_OUT, "Hosting a birthday party in six days", Priority::High)
            .flag_cooldown(7)
            .expires_after(14)
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        Ok(party_on(ctx, HOST_SIX_DAYS_OUT, &EventType::BirthdayPartyBooked, 6, any_event))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, matched: &RuleMatch) -> FlagResult<Attributes> {
        let mut out = party_output(ctx, HOST_SIX_DAYS_OUT, matched)?;
        let booking = matched.primary(HOST_SIX_DAYS_OUT)?;
        out.insert("total_guests".into(), booking.attr_or_null("total_guests"));
        out.insert("total_rsvp_yes".into(), booking.attr_or_null("total_yes"));
        Ok(out)
    }
}

pub struct AttendeeOneWeekOut;

impl FlagRule for AttendeeOneWeekOut {
    fn params(&self) -> RuleParams {
        RuleParams::new(
            ATTENDEE_ONE_WEEK_OUT,
            "RSVP'd yes to a birthday party in one week",
            Priority::Medium,
        )
        .flag_cooldown(7)
        .expires_after(14)
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        Ok(party_on(ctx, ATTENDEE_ONE_WEEK_OUT, &EventType::BirthdayPartyRsvp, 7, is_attending))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, matched: &RuleMatch) -> FlagResult<Attributes> {
        let mut out = party_output(ctx, ATTENDEE_ONE_WEEK_OUT, matched)?;
        let rsvp = matched.primary(ATTENDEE_ONE_WEEK_OUT)?;
        for key in ["rsvp_id", "host_email", "num_adults", "num_kids"] {
            out.insert(key.into(), rsvp.attr_or_null(key));
        }
        Ok(out)
    }
}
