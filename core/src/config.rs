use crate::ab_group::AbGroup;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

pub const DEFAULT_EXPERIMENT_ID: &str = "day_pass_conversion_2026_02";
pub const DEFAULT_CONSENT_METHOD: &str = "tag_sync_auto_subscribe";

/// Per-rule overrides from `flag_rules.json`.
///
/// A missing key keeps the catalogue default; an explicit `null` on a
/// cooldown/expiry key disables that window.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSettings {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "explicit")]
    pub flag_cooldown_days: Option<Option<i64>>,
    #[serde(default, deserialize_with = "explicit")]
    pub sync_cooldown_days: Option<Option<i64>>,
    #[serde(default, deserialize_with = "explicit")]
    pub expires_after_days: Option<Option<i64>>,
    #[serde(default)]
    pub auto_subscribe: Option<bool>,
}

/// Distinguishes "key absent" (outer None) from "key: null" (Some(None)).
fn explicit<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
struct FlagRulesFile {
    #[serde(default)]
    rules: BTreeMap<String, RuleSettings>,
    #[serde(default)]
    alias_tags: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    consent_method: Option<String>,
    #[serde(default)]
    halt_customer_on_failure: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct AbTestFile {
    experiment_id: String,
    #[serde(default)]
    overrides: BTreeMap<String, AbGroup>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub experiment_id: String,
    /// Manual group pins, keyed by customer id, email or phone digits.
    pub ab_overrides: BTreeMap<String, AbGroup>,
    pub rules: BTreeMap<String, RuleSettings>,
    /// Extra tags added alongside a rule's canonical tag.
    pub alias_tags: BTreeMap<String, Vec<String>>,
    /// Method string written to the consent ledger on auto-subscribe.
    pub consent_method: String,
    /// Stop a customer's remaining mutations after the first failed one.
    pub halt_customer_on_failure: bool,
}

impl SyncConfig {
    /// Load from `{data_dir}/flag_rules.json` and `{data_dir}/ab_test.json`.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let rules_path = format!("{data_dir}/flag_rules.json");
        let rules_content = std::fs::read_to_string(&rules_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {rules_path}: {e}"))?;
        let rules_file: FlagRulesFile = serde_json::from_str(&rules_content)
            .map_err(|e| anyhow::anyhow!("Invalid {rules_path}: {e}"))?;

        let ab_path = format!("{data_dir}/ab_test.json");
        let ab_content = std::fs::read_to_string(&ab_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {ab_path}: {e}"))?;
        let ab_file: AbTestFile = serde_json::from_str(&ab_content)
            .map_err(|e| anyhow::anyhow!("Invalid {ab_path}: {e}"))?;

        let defaults = Self::default_test();
        Ok(Self {
            experiment_id: ab_file.experiment_id,
            ab_overrides: ab_file.overrides,
            rules: rules_file.rules,
            alias_tags: rules_file.alias_tags.unwrap_or(defaults.alias_tags),
            consent_method: rules_file.consent_method.unwrap_or(defaults.consent_method),
            halt_customer_on_failure: rules_file
                .halt_customer_on_failure
                .unwrap_or(defaults.halt_customer_on_failure),
        })
    }

    /// Built-in defaults with no file I/O (used in tests).
    pub fn default_test() -> Self {
        let mut alias_tags = BTreeMap::new();
        alias_tags.insert("new_member".to_string(), vec!["new-membership".to_string()]);
        Self {
            experiment_id: DEFAULT_EXPERIMENT_ID.to_string(),
            ab_overrides: BTreeMap::new(),
            rules: BTreeMap::new(),
            alias_tags,
            consent_method: DEFAULT_CONSENT_METHOD.to_string(),
            halt_customer_on_failure: false,
        }
    }

    pub fn settings_for(&self, rule: &str) -> Option<&RuleSettings> {
        self.rules.get(rule)
    }
}
