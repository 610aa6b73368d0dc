//! A/B group assignment.
//!
//! RULE: Assignment is a pure function of stable identity. No randomness,
//! no clock, no storage. The same identity always lands in the same group.
//!
//! Identity precedence: manual override, then normalized email, then phone
//! digits, then customer id. The low-order hex digit of the MD5 of the chosen
//! identity, taken mod 10, splits 0–4 into A and 5–9 into B.

use crate::config::SyncConfig;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AbGroup {
    A,
    B,
}

impl AbGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbGroup::A => "A",
            AbGroup::B => "B",
        }
    }

    fn from_digit(digit: u8) -> Self {
        if digit < 5 { AbGroup::A } else { AbGroup::B }
    }
}

impl fmt::Display for AbGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AbAssigner {
    overrides: BTreeMap<String, AbGroup>,
}

impl AbAssigner {
    pub fn new(overrides: impl IntoIterator<Item = (String, AbGroup)>) -> Self {
        Self {
            overrides: overrides
                .into_iter()
                .map(|(k, g)| (override_key(&k), g))
                .collect(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.ab_overrides.clone())
    }

    pub fn assign(&self, customer_id: &str, email: Option<&str>, phone: Option<&str>) -> AbGroup {
        let email = normalize_email(email);
        let phone = normalize_phone(phone);

        let pinned = [Some(customer_id.to_string()), email.clone(), phone.clone()]
            .into_iter()
            .flatten()
            .find_map(|key| self.overrides.get(&override_key(&key)).copied());
        if let Some(group) = pinned {
            return group;
        }

        let basis = email
            .or(phone)
            .unwrap_or_else(|| customer_id.to_string());
        AbGroup::from_digit(low_order_digit(&basis))
    }
}

/// Keys without letters are phone numbers and match on digits alone, so
/// `512-555-0101` and `5125550101` pin the same customer.
fn override_key(raw: &str) -> String {
    let key = raw.trim().to_lowercase();
    if key.chars().any(char::is_alphabetic) {
        return key;
    }
    normalize_phone(Some(&key)).unwrap_or(key)
}

/// Blank values and the literal strings "nan"/"none" count as absent.
fn present(value: Option<&str>) -> Option<&str> {
    let v = value?.trim();
    if v.is_empty() || v.eq_ignore_ascii_case("nan") || v.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(v)
    }
}

pub fn normalize_email(email: Option<&str>) -> Option<String> {
    present(email).map(str::to_lowercase)
}

/// Digits only; a phone with no digits is treated as absent.
pub fn normalize_phone(phone: Option<&str>) -> Option<String> {
    let digits: String = present(phone)?.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() { None } else { Some(digits) }
}

fn low_order_digit(identity: &str) -> u8 {
    let digest = md5::compute(identity.as_bytes());
    (digest.0[15] & 0x0f) % 10
}
