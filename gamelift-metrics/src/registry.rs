// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Identity-keyed catalog of live metrics.
//!
//! The registry deduplicates metric instances by a composite identity: the
//! bare key when dimensional mode is off, or `key|k1=v1,k2=v2` (tags sorted
//! lexicographically) when it is on. The map itself is guarded by the
//! processor's state mutex; this module only provides the storage and the
//! identity computation.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::metric::Metric;

/// Compute the registry identity for `key` with the given tags.
///
/// Tags iterate in sorted order out of the `BTreeMap`, so the identity is
/// stable under tag insertion order. Empty tags collapse to the bare key in
/// both modes.
pub(crate) fn composite_key(
    key: &str,
    tags: &BTreeMap<String, String>,
    dimensional: bool,
) -> String {
    if !dimensional || tags.is_empty() {
        return key.to_string();
    }
    let mut identity = String::with_capacity(key.len() + 16 * tags.len());
    identity.push_str(key);
    identity.push('|');
    for (i, (k, v)) in tags.iter().enumerate() {
        if i > 0 {
            identity.push(',');
        }
        identity.push_str(k);
        identity.push('=');
        identity.push_str(v);
    }
    identity
}

#[derive(Default)]
pub(crate) struct MetricRegistry {
    metrics: HashMap<String, Arc<Metric>>,
}

impl MetricRegistry {
    /// Install `metric` under `identity` iff not already present, returning
    /// the canonical instance. Re-registration is a no-op, which is what
    /// makes builders reusable.
    pub(crate) fn register(&mut self, identity: String, metric: Arc<Metric>) -> Arc<Metric> {
        Arc::clone(self.metrics.entry(identity).or_insert(metric))
    }

    pub(crate) fn get(&self, identity: &str) -> Option<Arc<Metric>> {
        self.metrics.get(identity).cloned()
    }

    pub(crate) fn remove(&mut self, identity: &str) -> Option<Arc<Metric>> {
        self.metrics.remove(identity)
    }

    pub(crate) fn list(&self) -> Vec<Arc<Metric>> {
        self.metrics.values().cloned().collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Metric>> {
        self.metrics.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_key_when_dimensional_off() {
        let tags = BTreeMap::from([("b".into(), "2".into()), ("a".into(), "1".into())]);
        assert_eq!(composite_key("cpu", &tags, false), "cpu");
    }

    #[test]
    fn sorted_serialization_when_dimensional_on() {
        let tags = BTreeMap::from([("b".into(), "2".into()), ("a".into(), "1".into())]);
        assert_eq!(composite_key("cpu", &tags, true), "cpu|a=1,b=2");
    }

    #[test]
    fn identity_stable_under_insertion_order() {
        let mut left = BTreeMap::new();
        left.insert("region".to_string(), "us-east".to_string());
        left.insert("zone".to_string(), "a".to_string());
        let mut right = BTreeMap::new();
        right.insert("zone".to_string(), "a".to_string());
        right.insert("region".to_string(), "us-east".to_string());
        assert_eq!(
            composite_key("cpu", &left, true),
            composite_key("cpu", &right, true)
        );
    }

    #[test]
    fn empty_tags_collapse_to_key() {
        assert_eq!(composite_key("up", &BTreeMap::new(), true), "up");
    }
}
