//! Day-pass conversion rules: the two experiment arms, the arm-B follow-up,
//! and the standing "ready for membership" signal.

use super::{
    date_value, day_count, is_active_member, is_day_pass_checkin, FIRST_TIME_DAY_PASS_2WK_OFFER,
    READY_FOR_MEMBERSHIP, SECOND_VISIT_2WK_OFFER, SECOND_VISIT_OFFER_ELIGIBLE,
};
use crate::{
    ab_group::AbGroup,
    catalogue::{FlagRule, Priority, RuleContext, RuleMatch, RuleParams},
    clock::within_days,
    error::FlagResult,
    event::{Attributes, CustomerEvent, EventType},
};
use chrono::Duration;
use serde_json::Value;

const RECENT_CHECKIN_DAYS: i64 = 3;
const RETURN_GAP_DAYS: i64 = 60;
const RECENT_PASS_DAYS: i64 = 14;

/// A day-pass check-in in the last few days with no day-pass check-in in the
/// 60 days before it, for someone who is not an active member.
/// Evidence: the qualifying check-in, then the previous day-pass check-in if any.
fn returning_visit(ctx: &RuleContext<'_>) -> Option<RuleMatch> {
    if is_active_member(ctx) {
        return None;
    }
    let checkins: Vec<&CustomerEvent> = ctx.history.iter().filter(|e| is_day_pass_checkin(e)).collect();
    let latest = *checkins.last()?;
    if !within_days(latest.event_date, ctx.now, RECENT_CHECKIN_DAYS) {
        return None;
    }

    let latest_day = latest.event_date.date();
    let gap_start = latest_day - Duration::days(RETURN_GAP_DAYS);
    let earlier: Vec<&CustomerEvent> = checkins
        .iter()
        .copied()
        .filter(|e| e.event_date.date() < latest_day)
        .collect();
    if earlier.iter().any(|e| e.event_date.date() >= gap_start) {
        return None;
    }

    let mut evidence = vec![latest.clone()];
    if let Some(previous) = earlier.last() {
        evidence.push((*previous).clone());
    }
    Some(RuleMatch::on(evidence))
}

fn returning_visit_output(ctx: &RuleContext<'_>, rule: &str, matched: &RuleMatch) -> FlagResult<Attributes> {
    let latest = matched.primary(rule)?.event_date.date();
    let since_previous = matched
        .evidence
        .get(1)
        .map(|prev| day_count(prev.event_date.date(), latest));
    let total = ctx.history.iter().filter(|e| is_day_pass_checkin(e)).count();

    let mut out = Attributes::new();
    out.insert("most_recent_checkin_date".into(), date_value(latest));
    out.insert("days_since_checkin".into(), day_count(latest, ctx.today()).into());
    out.insert("total_day_pass_checkins".into(), total.into());
    out.insert(
        "days_since_previous_checkin".into(),
        since_previous.map_or(Value::Null, Value::from),
    );
    out.insert(
        "returning_after_break".into(),
        since_previous.map_or(true, |d| d >= RETURN_GAP_DAYS).into(),
    );
    Ok(out)
}

pub struct FirstTimeDayPassOffer;

impl FlagRule for FirstTimeDayPassOffer {
    fn params(&self) -> RuleParams {
        RuleParams::new(
            FIRST_TIME_DAY_PASS_2WK_OFFER,
            "Returning day-pass visitor offered a 2-week pass immediately",
            Priority::High,
        )
        .requires_group(AbGroup::A)
        .flag_cooldown(180)
        .sync_cooldown(30)
        .expires_after(14)
        .auto_subscribe()
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        Ok(returning_visit(ctx))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, matched: &RuleMatch) -> FlagResult<Attributes> {
        returning_visit_output(ctx, FIRST_TIME_DAY_PASS_2WK_OFFER, matched)
    }
}

pub struct SecondVisitOfferEligible;

impl FlagRule for SecondVisitOfferEligible {
    fn params(&self) -> RuleParams {
        RuleParams::new(
            SECOND_VISIT_OFFER_ELIGIBLE,
            "Returning day-pass visitor offered a discounted second visit",
            Priority::High,
        )
        .requires_group(AbGroup::B)
        .flag_cooldown(180)
        .sync_cooldown(30)
        .expires_after(14)
        .auto_subscribe()
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        Ok(returning_visit(ctx))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, matched: &RuleMatch) -> FlagResult<Attributes> {
        returning_visit_output(ctx, SECOND_VISIT_OFFER_ELIGIBLE, matched)
    }
}

/// Arm B follow-up: came back after the second-visit offer was flagged.
/// Evidence: the predecessor's `flag_set`, then the first check-in after it.
pub struct SecondVisit2wkOffer;

impl SecondVisit2wkOffer {
    fn checkins_after<'a>(ctx: &RuleContext<'a>, flagged: &CustomerEvent) -> Vec<&'a CustomerEvent> {
        ctx.events(&EventType::Checkin)
            .filter(|e| e.event_date > flagged.event_date)
            .collect()
    }
}

impl FlagRule for SecondVisit2wkOffer {
    fn params(&self) -> RuleParams {
        RuleParams::new(
            SECOND_VISIT_2WK_OFFER,
            "Returned after the second-visit offer; offered a 2-week pass",
            Priority::High,
        )
        .after(SECOND_VISIT_OFFER_ELIGIBLE)
        .in_experiment()
        .flag_cooldown(180)
        .sync_cooldown(30)
        .expires_after(14)
        .auto_subscribe()
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        if is_active_member(ctx) {
            return Ok(None);
        }
        let Some(flagged) = ctx.cooldown.latest_flag_set(SECOND_VISIT_OFFER_ELIGIBLE, None) else {
            return Ok(None);
        };
        let returned = Self::checkins_after(ctx, flagged);
        Ok(returned
            .first()
            .map(|first| RuleMatch::on(vec![flagged.clone(), (*first).clone()])))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, matched: &RuleMatch) -> FlagResult<Attributes> {
        let flagged = matched.primary(SECOND_VISIT_2WK_OFFER)?;
        let flag_day = flagged.event_date.date();
        let return_day = matched
            .evidence
            .get(1)
            .map_or(flag_day, |e| e.event_date.date());

        let mut out = Attributes::new();
        out.insert("second_pass_flag_date".into(), date_value(flag_day));
        out.insert("return_visit_date".into(), date_value(return_day));
        out.insert("days_to_return".into(), day_count(flag_day, return_day).into());
        out.insert(
            "total_checkins_after_flag".into(),
            Self::checkins_after(ctx, flagged).len().into(),
        );
        Ok(out)
    }
}

/// Standing: bought day passes recently and has never bought a membership.
/// Evidence: recent passes, most recent first.
pub struct ReadyForMembership;

impl FlagRule for ReadyForMembership {
    fn params(&self) -> RuleParams {
        RuleParams::new(
            READY_FOR_MEMBERSHIP,
            "Recent day-pass buyer who has never held a membership",
            Priority::High,
        )
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        let ever_member = ctx.history.iter().any(|e| {
            matches!(e.event_type, EventType::MembershipPurchase | EventType::MembershipRenewal)
        });
        if ever_member {
            return Ok(None);
        }
        let mut recent: Vec<CustomerEvent> = ctx
            .events(&EventType::DayPassPurchase)
            .filter(|e| within_days(e.event_date, ctx.now, RECENT_PASS_DAYS))
            .cloned()
            .collect();
        if recent.is_empty() {
            return Ok(None);
        }
        recent.reverse();
        Ok(Some(RuleMatch::on(recent)))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, matched: &RuleMatch) -> FlagResult<Attributes> {
        let latest = matched.primary(READY_FOR_MEMBERSHIP)?.event_date.date();
        let mut out = Attributes::new();
        out.insert("day_pass_count_last_14_days".into(), matched.evidence.len().into());
        out.insert("most_recent_day_pass_date".into(), date_value(latest));
        out.insert("days_since_last_pass".into(), day_count(latest, ctx.today()).into());
        Ok(out)
    }
}
