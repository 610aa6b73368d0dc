//! Membership lifecycle rules: onboarding, win-back, prepaid passes and the
//! standing status flags.

use super::{
    date_value, day_count, is_prepaid_pass, is_youth_membership, open_memberships, OpenMembership,
    ACTIVE_MEMBERSHIP, ACTIVE_PREPAID_PASS, HAS_YOUTH, MEMBERSHIP_CANCELLED_WINBACK, NEW_MEMBER,
    TWO_WEEK_PASS_PURCHASE,
};
use crate::{
    catalogue::{FlagRule, Priority, RuleContext, RuleMatch, RuleParams},
    clock::within_days,
    error::FlagResult,
    event::{Attributes, CustomerEvent, EventType},
};
use chrono::Duration;
use serde_json::Value;

const NEW_MEMBER_RECENT_DAYS: i64 = 3;
const NEW_MEMBER_LOOKBACK_DAYS: i64 = 180;
const WINBACK_RECENT_DAYS: i64 = 7;
const PREPAID_PASS_DAYS: i64 = 14;

fn is_start(e: &CustomerEvent) -> bool {
    matches!(e.event_type, EventType::MembershipStarted | EventType::MembershipPurchase)
}

/// Membership start or purchase in the last few days with no membership
/// activity in the 180 days before it.
/// Evidence: the start, then the most recent earlier membership event if any.
pub struct NewMember;

impl FlagRule for NewMember {
    fn params(&self) -> RuleParams {
        RuleParams::new(NEW_MEMBER, "Membership started within the last few days", Priority::High)
            .flag_cooldown(14)
            .sync_cooldown(14)
            .expires_after(14)
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        let Some(start) = ctx.history.iter().filter(|e| is_start(e)).last() else {
            return Ok(None);
        };
        if !within_days(start.event_date, ctx.now, NEW_MEMBER_RECENT_DAYS) {
            return Ok(None);
        }
        let start_day = start.event_date.date();
        let lookback = start_day - Duration::days(NEW_MEMBER_LOOKBACK_DAYS);
        let prior = ctx
            .history
            .iter()
            .filter(|e| e.event_type.is_membership_activity())
            .filter(|e| e.event_date.date() < start_day)
            .last();
        if prior.map_or(false, |p| p.event_date.date() >= lookback) {
            return Ok(None);
        }

        let mut evidence = vec![start.clone()];
        if let Some(p) = prior {
            evidence.push(p.clone());
        }
        Ok(Some(RuleMatch::on(evidence)))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, matched: &RuleMatch) -> FlagResult<Attributes> {
        let start = matched.primary(NEW_MEMBER)?;
        let start_day = start.event_date.date();
        let since_last = matched
            .evidence
            .get(1)
            .map(|p| day_count(p.event_date.date(), start_day));

        let mut out = Attributes::new();
        out.insert("membership_start_date".into(), date_value(start_day));
        out.insert("days_since_start".into(), day_count(start_day, ctx.today()).into());
        out.insert("membership_name".into(), start.attr_or_null("membership_name"));
        out.insert("membership_id".into(), start.attr_or_null("membership_id"));
        out.insert("is_first_time_member".into(), since_last.is_none().into());
        out.insert("days_since_last_membership".into(), since_last.map_or(Value::Null, Value::from));
        Ok(out)
    }
}

/// A cancellation in the last week with nothing reactivating it since.
pub struct MembershipCancelledWinback;

impl FlagRule for MembershipCancelledWinback {
    fn params(&self) -> RuleParams {
        RuleParams::new(
            MEMBERSHIP_CANCELLED_WINBACK,
            "Cancelled a membership within the last week",
            Priority::High,
        )
        .flag_cooldown(180)
        .sync_cooldown(30)
        .expires_after(14)
        .auto_subscribe()
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        let latest = ctx
            .history
            .iter()
            .filter(|e| e.event_type.is_membership_activity())
            .last();
        match latest {
            Some(e) if e.is(&EventType::MembershipCancelled)
                && within_days(e.event_date, ctx.now, WINBACK_RECENT_DAYS) =>
            {
                Ok(Some(RuleMatch::on(vec![e.clone()])))
            }
            _ => Ok(None),
        }
    }

    fn build_output(&self, ctx: &RuleContext<'_>, matched: &RuleMatch) -> FlagResult<Attributes> {
        let cancelled = matched.primary(MEMBERSHIP_CANCELLED_WINBACK)?;
        let day = cancelled.event_date.date();
        let total = ctx.events(&EventType::MembershipCancelled).count();

        let mut out = Attributes::new();
        out.insert("cancellation_date".into(), date_value(day));
        out.insert("days_since_cancellation".into(), day_count(day, ctx.today()).into());
        out.insert("cancelled_membership_name".into(), cancelled.attr_or_null("membership_name"));
        out.insert("cancelled_membership_id".into(), cancelled.attr_or_null("membership_id"));
        out.insert("total_cancellations".into(), total.into());
        Ok(out)
    }
}

/// A prepaid 2-week pass started within its own two-week lifetime.
pub struct TwoWeekPassPurchase;

impl TwoWeekPassPurchase {
    fn is_pass_start(e: &CustomerEvent) -> bool {
        e.is(&EventType::MembershipStarted)
            && e.attr_str("membership_name").map_or(false, is_prepaid_pass)
    }
}

impl FlagRule for TwoWeekPassPurchase {
    fn params(&self) -> RuleParams {
        RuleParams::new(TWO_WEEK_PASS_PURCHASE, "Started a prepaid 2-week pass", Priority::Medium)
            .flag_cooldown(14)
            .expires_after(14)
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        Ok(ctx
            .history
            .iter()
            .filter(|e| Self::is_pass_start(e))
            .last()
            .filter(|e| within_days(e.event_date, ctx.now, PREPAID_PASS_DAYS))
            .map(|e| RuleMatch::on(vec![e.clone()])))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, matched: &RuleMatch) -> FlagResult<Attributes> {
        let start = matched.primary(TWO_WEEK_PASS_PURCHASE)?;
        let day = start.event_date.date();
        let total = ctx.history.iter().filter(|e| Self::is_pass_start(e)).count();

        let mut out = Attributes::new();
        out.insert("membership_start_date".into(), date_value(day));
        out.insert("days_since_start".into(), day_count(day, ctx.today()).into());
        out.insert("membership_name".into(), start.attr_or_null("membership_name"));
        out.insert("membership_id".into(), start.attr_or_null("membership_id"));
        out.insert("end_date".into(), start.attr_or_null("end_date"));
        out.insert("billing_amount".into(), start.attr_or_null("billing_amount"));
        out.insert("total_2wk_memberships".into(), total.into());
        Ok(out)
    }
}

fn memberships_output(open: &[OpenMembership<'_>]) -> Attributes {
    let names: Vec<Value> = open.iter().map(|m| Value::String(m.name.clone())).collect();
    let ids: Vec<Value> = open.iter().map(|m| Value::String(m.id.clone())).collect();
    let mut out = Attributes::new();
    out.insert("membership_count".into(), open.len().into());
    out.insert("membership_names".into(), Value::Array(names));
    out.insert("membership_ids".into(), Value::Array(ids));
    out
}

fn open_where<'a>(ctx: &RuleContext<'a>, rule: &str, prepaid: bool) -> Vec<OpenMembership<'a>> {
    open_memberships(ctx, rule)
        .into_iter()
        .filter(|m| is_prepaid_pass(&m.name) == prepaid)
        .collect()
}

/// Standing: holds at least one open regular membership.
pub struct ActiveMembership;

impl FlagRule for ActiveMembership {
    fn params(&self) -> RuleParams {
        RuleParams::new(ACTIVE_MEMBERSHIP, "Holds an active membership", Priority::Low)
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        let open = open_where(ctx, ACTIVE_MEMBERSHIP, false);
        if open.is_empty() {
            return Ok(None);
        }
        Ok(Some(RuleMatch::on(open.iter().map(|m| m.latest.clone()).collect())))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, _matched: &RuleMatch) -> FlagResult<Attributes> {
        Ok(memberships_output(&open_where(ctx, ACTIVE_MEMBERSHIP, false)))
    }
}

/// Standing: holds at least one open prepaid pass.
pub struct ActivePrepaidPass;

impl FlagRule for ActivePrepaidPass {
    fn params(&self) -> RuleParams {
        RuleParams::new(ACTIVE_PREPAID_PASS, "Holds an active prepaid pass", Priority::Low)
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        let open = open_where(ctx, ACTIVE_PREPAID_PASS, true);
        if open.is_empty() {
            return Ok(None);
        }
        Ok(Some(RuleMatch::on(open.iter().map(|m| m.latest.clone()).collect())))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, _matched: &RuleMatch) -> FlagResult<Attributes> {
        Ok(memberships_output(&open_where(ctx, ACTIVE_PREPAID_PASS, true)))
    }
}

/// Standing: household has a youth/family membership or birthday-party activity.
pub struct HasYouth;

impl HasYouth {
    fn reasons(ctx: &RuleContext<'_>) -> (Vec<CustomerEvent>, Vec<&'static str>) {
        let mut evidence = Vec::new();
        let mut reasons = Vec::new();

        let youth: Vec<CustomerEvent> = open_memberships(ctx, HAS_YOUTH)
            .into_iter()
            .filter(|m| is_youth_membership(&m.name))
            .map(|m| m.latest.clone())
            .collect();
        if !youth.is_empty() {
            evidence.extend(youth);
            reasons.push("youth_membership");
        }
        if let Some(booked) = ctx.events(&EventType::BirthdayPartyBooked).last() {
            evidence.push(booked.clone());
            reasons.push("birthday_party_host");
        }
        let attended = ctx
            .events(&EventType::BirthdayPartyRsvp)
            .filter(|e| super::party::is_attending(e))
            .last();
        if let Some(rsvp) = attended {
            evidence.push(rsvp.clone());
            reasons.push("birthday_party_attendee");
        }
        (evidence, reasons)
    }
}

impl FlagRule for HasYouth {
    fn params(&self) -> RuleParams {
        RuleParams::new(HAS_YOUTH, "Household includes a child", Priority::Low)
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        let (evidence, _) = Self::reasons(ctx);
        Ok((!evidence.is_empty()).then(|| RuleMatch::on(evidence)))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, _matched: &RuleMatch) -> FlagResult<Attributes> {
        let (_, reasons) = Self::reasons(ctx);
        let mut out = Attributes::new();
        out.insert(
            "reasons".into(),
            Value::Array(reasons.into_iter().map(|r| Value::String(r.to_string())).collect()),
        );
        Ok(out)
    }
}
