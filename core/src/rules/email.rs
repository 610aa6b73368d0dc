use super::{date_value, day_count, FIFTY_PERCENT_OFFER_SENT};
use crate::{
    catalogue::{FlagRule, Priority, RuleContext, RuleMatch, RuleParams},
    clock::within_days,
    error::FlagResult,
    event::{Attributes, EventType},
};

const RECENT_EMAIL_DAYS: i64 = 3;
const OFFER_MARKER: &str = "50%";
const COPIED_FIELDS: [&str; 7] = [
    "campaign_title",
    "offer_amount",
    "offer_type",
    "offer_code",
    "offer_expires",
    "offer_description",
    "email_subject",
];

/// A 50%-off offer email went out in the last few days.
/// Evidence: the most recent such email.
pub struct FiftyPercentOfferSent;

impl FlagRule for FiftyPercentOfferSent {
    fn params(&self) -> RuleParams {
        RuleParams::new(
            FIFTY_PERCENT_OFFER_SENT,
            "Received a 50% offer email in the last few days",
            Priority::Medium,
        )
        .flag_cooldown(30)
        .expires_after(14)
    }

    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>> {
        let mut latest = None;
        for e in ctx
            .events(&EventType::EmailSent)
            .filter(|e| within_days(e.event_date, ctx.now, RECENT_EMAIL_DAYS))
        {
            if !e.attributes.contains_key("offer_amount") {
                continue;
            }
            match e.attr_text("offer_amount") {
                Some(amount) if amount.contains(OFFER_MARKER) => latest = Some(e),
                Some(_) => {}
                None => ctx.skip_malformed(
                    FIFTY_PERCENT_OFFER_SENT,
                    e.malformed("offer_amount is not a scalar"),
                ),
            }
        }
        Ok(latest.map(|e| RuleMatch::on(vec![e.clone()])))
    }

    fn build_output(&self, ctx: &RuleContext<'_>, matched: &RuleMatch) -> FlagResult<Attributes> {
        let email = matched.primary(FIFTY_PERCENT_OFFER_SENT)?;
        let day = email.event_date.date();
        let mut out = Attributes::new();
        out.insert("email_sent_date".into(), date_value(day));
        out.insert("days_since_email".into(), day_count(day, ctx.today()).into());
        for key in COPIED_FIELDS {
            out.insert(key.into(), email.attr_or_null(key));
        }
        Ok(out)
    }
}
