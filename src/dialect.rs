//! Vendor dialect codec.
//!
//! Every vendor speaks its own spellings for the same abstract values:
//! a rising edge is `POSitive` on one scope and `RISe` on another, and the
//! short and long SCPI forms of each may both come back in query responses.
//! A [`DialectTable`] is a bidirectional mapping built once per enum per
//! vendor:
//!
//! - `encode` emits exactly one canonical spelling per abstract value and
//!   fails with a contract error for an unmapped value -- an unmapped value
//!   is an adapter bug, not a runtime condition.
//! - `decode` accepts every registered spelling and returns `None` for an
//!   unrecognized token. Firmware revisions drift; an unknown token from the
//!   wire must degrade, not crash.
//!
//! Tables are declared as `once_cell::sync::Lazy` statics inside each vendor
//! module and shared read-only across sessions.

use crate::error::{BenchError, Result};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Bidirectional mapping between one abstract enum and one vendor's wire
/// tokens.
pub struct DialectTable<E> {
    canonical: HashMap<E, &'static str>,
    spellings: HashMap<&'static str, E>,
}

impl<E> DialectTable<E>
where
    E: Copy + Eq + Hash + fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            canonical: HashMap::new(),
            spellings: HashMap::new(),
        }
    }

    /// Register one abstract value with its canonical wire token and any
    /// additional accepted spellings. The canonical token itself always
    /// decodes back to `value`.
    pub fn entry(mut self, value: E, canonical: &'static str, accepted: &[&'static str]) -> Self {
        self.canonical.insert(value, canonical);
        self.spellings.insert(canonical, value);
        for spelling in accepted {
            self.spellings.insert(spelling, value);
        }
        self
    }

    /// Canonical wire token for `value`.
    ///
    /// # Errors
    /// Contract error when the dialect has no entry for `value`.
    pub fn encode(&self, value: E) -> Result<&'static str> {
        self.canonical.get(&value).copied().ok_or_else(|| {
            BenchError::Contract(format!("no wire token for {:?} in this dialect", value))
        })
    }

    /// Abstract value for a wire token, or `None` for an unrecognized one.
    pub fn decode(&self, token: &str) -> Option<E> {
        self.spellings.get(token.trim()).copied()
    }

    /// True when `value` has an entry (used for "is this encoding supported
    /// on this instrument" checks before any wire traffic).
    pub fn supports(&self, value: E) -> bool {
        self.canonical.contains_key(&value)
    }

    /// Iterate the abstract values this dialect maps, in no defined order.
    pub fn values(&self) -> impl Iterator<Item = E> + '_ {
        self.canonical.keys().copied()
    }
}

impl<E> Default for DialectTable<E>
where
    E: Copy + Eq + Hash + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TriggerEdge;

    fn edges() -> DialectTable<TriggerEdge> {
        DialectTable::new()
            .entry(TriggerEdge::Rising, "POSitive", &["POS"])
            .entry(TriggerEdge::Falling, "NEGative", &["NEG"])
    }

    #[test]
    fn encode_emits_canonical_spelling() {
        let table = edges();
        assert_eq!(table.encode(TriggerEdge::Rising).unwrap(), "POSitive");
    }

    #[test]
    fn decode_accepts_all_spellings() {
        let table = edges();
        assert_eq!(table.decode("POS"), Some(TriggerEdge::Rising));
        assert_eq!(table.decode("POSitive"), Some(TriggerEdge::Rising));
        assert_eq!(table.decode("NEG\n"), Some(TriggerEdge::Falling));
    }

    #[test]
    fn decode_returns_none_for_drifted_token() {
        let table = edges();
        assert_eq!(table.decode("RFALl"), None);
    }

    #[test]
    fn encode_fails_for_unmapped_value() {
        let table = edges();
        assert!(table.encode(TriggerEdge::Any).is_err());
    }

    #[test]
    fn round_trip_over_canonical_tokens() {
        let table = edges();
        for value in table.values().collect::<Vec<_>>() {
            let token = table.encode(value).unwrap();
            assert_eq!(table.decode(token), Some(value));
            assert_eq!(table.encode(table.decode(token).unwrap()).unwrap(), token);
        }
    }
}
