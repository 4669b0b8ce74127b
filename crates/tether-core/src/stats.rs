use std::collections::BTreeMap;

use serde::Serialize;

use crate::query::QueryClass;

/// Counters describing how much work the engine saved and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Fetches requested by callers and cascades, before merging.
    pub logical_fetches: BTreeMap<QueryClass, u64>,
    /// Subscriptions actually opened on the transport.
    pub wire_subscriptions: BTreeMap<QueryClass, u64>,
    pub accepted_by_kind: BTreeMap<u16, u64>,
    pub duplicates: u64,
    pub deleted_drops: u64,
    pub republished_deletions: u64,
}

impl EngineStats {
    pub fn record_logical(&mut self, class: QueryClass) {
        *self.logical_fetches.entry(class).or_insert(0) += 1;
    }

    pub fn record_wire(&mut self, class: QueryClass) {
        *self.wire_subscriptions.entry(class).or_insert(0) += 1;
    }

    pub fn record_accepted(&mut self, kind: u16) {
        *self.accepted_by_kind.entry(kind).or_insert(0) += 1;
    }

    pub fn total_accepted(&self) -> u64 {
        self.accepted_by_kind.values().sum()
    }

    /// Logical fetches per wire subscription for `class`.
    pub fn merge_ratio(&self, class: QueryClass) -> Option<f64> {
        let wire = *self.wire_subscriptions.get(&class)?;
        if wire == 0 {
            return None;
        }
        let logical = self.logical_fetches.get(&class).copied().unwrap_or(0);
        Some(logical as f64 / wire as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_ratio() {
        let mut stats = EngineStats::default();
        assert_eq!(stats.merge_ratio(QueryClass::Profile), None);
        for _ in 0..4 {
            stats.record_logical(QueryClass::Profile);
        }
        stats.record_wire(QueryClass::Profile);
        stats.record_wire(QueryClass::Profile);
        assert_eq!(stats.merge_ratio(QueryClass::Profile), Some(2.0));
    }

    #[test]
    fn test_serializes_class_keys_as_names() {
        let mut stats = EngineStats::default();
        stats.record_wire(QueryClass::AddressCoordinates);
        stats.record_accepted(39701);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["wire_subscriptions"]["address_coordinates"], 1);
        assert_eq!(json["accepted_by_kind"]["39701"], 1);
        assert_eq!(stats.total_accepted(), 1);
    }
}
