//! Canonical factor names and the per-observation factor mapping.
//!
//! Upstream rows name the same signal in several ways (`holderCount`,
//! `holder_count`, `Holder-Count`). Every key goes through
//! [`normalize_factor_name`] exactly once, when the map is built, and the
//! condition evaluator normalizes identifiers the same way. Lookups never
//! fall back through alternative spellings.

use std::collections::BTreeMap;
use std::fmt;

/// Spelling variants that resolve to a single canonical factor.
const ALIASES: &[(&str, &str)] = &[
    ("tvl", "liquidity"),
    ("holder_count", "holders"),
    ("holders_count", "holders"),
    ("age_minutes", "age"),
    ("age_in_minutes", "age"),
    ("volume_24h", "volume"),
    ("market_cap", "fdv"),
];

/// Canonicalize a factor name: trim, camelCase to snake_case, separators to
/// `_`, lowercase, then resolve aliases.
pub fn normalize_factor_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev: Option<char> = None;

    for ch in raw.trim().chars() {
        if ch == '-' || ch == ' ' || ch == '.' || ch == '_' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
        } else if ch.is_uppercase() {
            if prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit())
                && !out.ends_with('_')
            {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
        prev = Some(ch);
    }

    while out.ends_with('_') {
        out.pop();
    }

    ALIASES
        .iter()
        .find(|(alias, _)| *alias == out)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(out)
}

/// Named numeric signals about one asset at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactorMap {
    values: BTreeMap<String, f64>,
}

impl FactorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under the canonical form of `name`, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: f64) {
        self.values.insert(normalize_factor_name(name), value);
    }

    /// Value for `name`, or `None` if the factor was never supplied.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(&normalize_factor_name(name)).copied()
    }

    /// Lookup by a name that is already canonical.
    pub(crate) fn get_canonical(&self, canonical: &str) -> Option<f64> {
        self.values.get(canonical).copied()
    }

    /// Overlay `other` onto `self`; keys in `other` win.
    pub fn merge(&mut self, other: &FactorMap) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), *v);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: AsRef<str>> FromIterator<(S, f64)> for FactorMap {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut map = FactorMap::new();
        for (name, value) in iter {
            map.insert(name.as_ref(), value);
        }
        map
    }
}

impl fmt::Display for FactorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.values {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}
