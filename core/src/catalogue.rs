//! Rule catalogue — the closed set of flag rules and their parameters.
//!
//! RULE: Every rule implements FlagRule. Conditions and output builders are
//! pure over (history, now, group); cooldown enforcement belongs to the engine.
//! RULE: Rules are held in descending priority order; ties keep catalogue order.
//! RULE: A predecessor must name a known rule, and chains must be acyclic.
//! RULE: Windows are non-negative. Oversized windows are allowed and cover
//! all of history.

use crate::{
    ab_group::AbGroup,
    config::SyncConfig,
    cooldown::CooldownTracker,
    error::{FlagError, FlagResult},
    event::{Attributes, CustomerEvent, EventType},
    types::Timestamp,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
};

/// Suffix a downstream flow adds to acknowledge it acted on a tag.
pub const ACK_SUFFIX: &str = "-sent";

/// Variant suffix for flags raised on a child but delivered to a parent's contact.
pub const CHILD_SUFFIX: &str = "_child";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High   => "high",
            Priority::Medium => "medium",
            Priority::Low    => "low",
        }
    }

    /// Sort key; lower ranks are evaluated and reported first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High   => 0,
            Priority::Medium => 1,
            Priority::Low    => 2,
        }
    }
}

/// Tag name for a flag type: underscores become hyphens.
pub fn tag_for(flag_type: &str) -> String {
    flag_type.replace('_', "-")
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleParams {
    pub name:               &'static str,
    pub description:        &'static str,
    pub priority:           Priority,
    /// None: no flag cooldown, the rule stands while its condition holds.
    pub flag_cooldown_days: Option<i64>,
    pub sync_cooldown_days: Option<i64>,
    pub expires_after_days: Option<i64>,
    pub ab_group_required:  Option<AbGroup>,
    pub predecessor:        Option<&'static str>,
    /// Instances carry `experiment_id` and `ab_group` in their output.
    pub experiment:         bool,
    pub auto_subscribe:     bool,
    pub enabled:            bool,
}

impl RuleParams {
    pub fn new(name: &'static str, description: &'static str, priority: Priority) -> Self {
        Self {
            name,
            description,
            priority,
            flag_cooldown_days: None,
            sync_cooldown_days: None,
            expires_after_days: None,
            ab_group_required:  None,
            predecessor:        None,
            experiment:         false,
            auto_subscribe:     false,
            enabled:            true,
        }
    }

    pub fn flag_cooldown(mut self, days: i64) -> Self {
        self.flag_cooldown_days = Some(days);
        self
    }

    pub fn sync_cooldown(mut self, days: i64) -> Self {
        self.sync_cooldown_days = Some(days);
        self
    }

    pub fn expires_after(mut self, days: i64) -> Self {
        self.expires_after_days = Some(days);
        self
    }

    pub fn requires_group(mut self, group: AbGroup) -> Self {
        self.ab_group_required = Some(group);
        self.experiment = true;
        self
    }

    pub fn after(mut self, predecessor: &'static str) -> Self {
        self.predecessor = Some(predecessor);
        self
    }

    pub fn in_experiment(mut self) -> Self {
        self.experiment = true;
        self
    }

    pub fn auto_subscribe(mut self) -> Self {
        self.auto_subscribe = true;
        self
    }

    /// Cooldown and expiry windows must not be negative.
    fn validate(&self) -> FlagResult<()> {
        let windows = [
            ("flag_cooldown_days", self.flag_cooldown_days),
            ("sync_cooldown_days", self.sync_cooldown_days),
            ("expires_after_days", self.expires_after_days),
        ];
        for (field, days) in windows {
            if let Some(d) = days.filter(|d| *d < 0) {
                return Err(FlagError::InvalidCatalogue(format!(
                    "rule '{}' has negative {field} ({d})",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn apply(&mut self, config: &SyncConfig) {
        let Some(s) = config.settings_for(self.name) else { return };
        if let Some(enabled) = s.enabled {
            self.enabled = enabled;
        }
        if let Some(days) = s.flag_cooldown_days {
            self.flag_cooldown_days = days;
        }
        if let Some(days) = s.sync_cooldown_days {
            self.sync_cooldown_days = days;
        }
        if let Some(days) = s.expires_after_days {
            self.expires_after_days = days;
        }
        if let Some(auto) = s.auto_subscribe {
            self.auto_subscribe = auto;
        }
    }
}

/// Everything a condition may look at for one customer.
pub struct RuleContext<'a> {
    pub customer_id: &'a str,
    /// Ascending by `event_date`, nothing later than `now`.
    pub history:     &'a [CustomerEvent],
    pub now:         Timestamp,
    pub ab_group:    AbGroup,
    pub cooldown:    CooldownTracker<'a>,
    malformed:       RefCell<Vec<(String, FlagError)>>,
}

impl<'a> RuleContext<'a> {
    pub fn new(customer_id: &'a str, history: &'a [CustomerEvent], now: Timestamp, ab_group: AbGroup) -> Self {
        Self {
            customer_id,
            history,
            now,
            ab_group,
            cooldown: CooldownTracker::new(history, now),
            malformed: RefCell::new(Vec::new()),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }

    pub fn events<'s>(&'s self, event_type: &'s EventType) -> impl Iterator<Item = &'a CustomerEvent> + 's {
        self.history.iter().filter(move |e| e.is(event_type))
    }

    /// Record an event a rule had to skip. The event is ignored for that
    /// rule only; evaluation continues.
    pub fn skip_malformed(&self, rule: &str, err: FlagError) {
        log::debug!("customer={} rule={rule} skipped event: {err}", self.customer_id);
        let mut seen = self.malformed.borrow_mut();
        let text = err.to_string();
        if !seen.iter().any(|(r, e)| r == rule && e.to_string() == text) {
            seen.push((rule.to_string(), err));
        }
    }

    /// Skipped events as (rule, error) pairs, in the order they were seen.
    pub fn take_malformed(&self) -> Vec<(String, FlagError)> {
        self.malformed.take()
    }
}

/// A condition hit: the triggering events (rule-defined order, primary first)
/// and, for per-party rules, the party it is scoped to.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub evidence: Vec<CustomerEvent>,
    pub party_id: Option<String>,
}

impl RuleMatch {
    pub fn on(evidence: Vec<CustomerEvent>) -> Self {
        Self { evidence, party_id: None }
    }

    pub fn for_party(party_id: String, evidence: Vec<CustomerEvent>) -> Self {
        Self { evidence, party_id: Some(party_id) }
    }

    pub fn primary(&self, rule: &str) -> FlagResult<&CustomerEvent> {
        self.evidence.first().ok_or_else(|| FlagError::RuleEvaluation {
            rule:   rule.to_string(),
            reason: "match carries no evidence".into(),
        })
    }
}

/// The contract every flag rule fulfills.
pub trait FlagRule: Send + Sync {
    /// Catalogue defaults; config overrides are applied on top.
    fn params(&self) -> RuleParams;

    /// `Ok(None)` when the rule does not apply. Malformed events are skipped
    /// through `RuleContext::skip_malformed`; `Err` fails only this rule.
    fn condition(&self, ctx: &RuleContext<'_>) -> FlagResult<Option<RuleMatch>>;

    /// Structured output for a match. Must be deterministic.
    fn build_output(&self, ctx: &RuleContext<'_>, matched: &RuleMatch) -> FlagResult<Attributes>;
}

pub struct CatalogueEntry {
    pub params: RuleParams,
    rule:       Box<dyn FlagRule>,
}

impl CatalogueEntry {
    pub fn rule(&self) -> &dyn FlagRule {
        self.rule.as_ref()
    }
}

pub struct Catalogue {
    entries:   Vec<CatalogueEntry>,
    aliases:   BTreeMap<String, Vec<String>>,
    /// Every managed tag (canonical, child variant, alias) to its rule.
    tag_index: BTreeMap<String, &'static str>,
}

impl Catalogue {
    pub fn new(rules: Vec<Box<dyn FlagRule>>, config: &SyncConfig) -> FlagResult<Self> {
        let mut entries: Vec<CatalogueEntry> = rules
            .into_iter()
            .map(|rule| {
                let mut params = rule.params();
                params.apply(config);
                CatalogueEntry { params, rule }
            })
            .collect();

        let mut names = BTreeSet::new();
        for e in &entries {
            if !names.insert(e.params.name) {
                return Err(FlagError::InvalidCatalogue(format!("duplicate rule '{}'", e.params.name)));
            }
            e.params.validate()?;
        }
        for name in config.rules.keys() {
            if !names.contains(name.as_str()) {
                log::warn!("config names unknown rule '{name}', ignored");
            }
        }
        validate_predecessors(&entries)?;

        entries.sort_by_key(|e| e.params.priority.rank());

        let mut aliases = BTreeMap::new();
        let mut tag_index = BTreeMap::new();
        for e in &entries {
            let name = e.params.name;
            tag_index.insert(tag_for(name), name);
            tag_index.insert(tag_for(&format!("{name}{CHILD_SUFFIX}")), name);
            if let Some(extra) = config.alias_tags.get(name) {
                for alias in extra {
                    tag_index.insert(alias.clone(), name);
                }
                aliases.insert(name.to_string(), extra.clone());
            }
        }
        for rule in config.alias_tags.keys() {
            if !names.contains(rule.as_str()) {
                log::warn!("alias tags configured for unknown rule '{rule}', ignored");
            }
        }

        Ok(Self { entries, aliases, tag_index })
    }

    /// The built-in rule set with config overrides applied.
    pub fn standard(config: &SyncConfig) -> FlagResult<Self> {
        Self::new(crate::rules::standard_rules(), config)
    }

    pub fn entries(&self) -> &[CatalogueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn params(&self, rule: &str) -> Option<&RuleParams> {
        self.entries
            .iter()
            .map(|e| &e.params)
            .find(|p| p.name == rule)
    }

    /// Canonical tag for the flag type, followed by the rule's alias tags.
    pub fn tags_for(&self, rule: &str, flag_type: &str) -> Vec<String> {
        let mut tags = vec![tag_for(flag_type)];
        if let Some(extra) = self.aliases.get(rule) {
            tags.extend(extra.iter().cloned());
        }
        tags
    }

    /// The rule owning a tag. Acknowledgement tags (`<managed>-sent`) and
    /// tags no rule produces are unmanaged.
    pub fn rule_for_tag(&self, tag: &str) -> Option<&'static str> {
        if self.is_acknowledgement(tag) {
            return None;
        }
        self.tag_index.get(tag).copied()
    }

    pub fn is_alias(&self, tag: &str) -> bool {
        self.aliases.values().any(|tags| tags.iter().any(|t| t == tag))
    }

    pub fn is_acknowledgement(&self, tag: &str) -> bool {
        tag.strip_suffix(ACK_SUFFIX)
            .map_or(false, |base| self.tag_index.contains_key(base))
    }
}

fn validate_predecessors(entries: &[CatalogueEntry]) -> FlagResult<()> {
    let by_name: BTreeMap<&str, Option<&str>> = entries
        .iter()
        .map(|e| (e.params.name, e.params.predecessor))
        .collect();

    for (name, predecessor) in &by_name {
        let Some(first) = predecessor else { continue };
        if !by_name.contains_key(first) {
            return Err(FlagError::InvalidCatalogue(format!(
                "rule '{name}' names unknown predecessor '{first}'"
            )));
        }
        let mut seen = BTreeSet::from([*name]);
        let mut cursor = Some(*first);
        while let Some(current) = cursor {
            if !seen.insert(current) {
                return Err(FlagError::InvalidCatalogue(format!(
                    "predecessor cycle through rule '{name}'"
                )));
            }
            cursor = by_name.get(current).copied().flatten();
        }
    }
    Ok(())
}
