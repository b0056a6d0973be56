//! The simulated database state (spec §3): a pair of mappings, deep-cloned
//! between steps so `up`/`down` closures can never alias shared state.

use std::collections::BTreeMap;

use bson::{doc, Bson, Document};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimState {
    pub collections: BTreeMap<String, Vec<Document>>,
    pub multi_instances: BTreeMap<String, Vec<Document>>,
}

impl SimState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Structural diff used in reversibility-mismatch error messages (spec §4.4).
    pub fn diff(&self, other: &SimState) -> String {
        let mut lines = Vec::new();
        for name in self.collections.keys().chain(other.collections.keys()).collect::<std::collections::BTreeSet<_>>() {
            let a = self.collections.get(name).map(|v| v.len()).unwrap_or(0);
            let b = other.collections.get(name).map(|v| v.len()).unwrap_or(0);
            if a != b {
                lines.push(format!("collection {name}: {a} vs {b} documents"));
            }
        }
        for name in
            self.multi_instances.keys().chain(other.multi_instances.keys()).collect::<std::collections::BTreeSet<_>>()
        {
            let a = self.multi_instances.get(name).map(|v| v.len()).unwrap_or(0);
            let b = other.multi_instances.get(name).map(|v| v.len()).unwrap_or(0);
            if a != b {
                lines.push(format!("instance {name}: {a} vs {b} documents"));
            }
        }
        if lines.is_empty() {
            "document order differs within a collection".to_string()
        } else {
            lines.join("; ")
        }
    }

    /// Equality modulo document order within a collection (testable property 4).
    pub fn equal_modulo_order(&self, other: &SimState) -> bool {
        if self.collections.keys().collect::<Vec<_>>() != other.collections.keys().collect::<Vec<_>>() {
            return false;
        }
        for (name, docs) in &self.collections {
            let other_docs = &other.collections[name];
            if !same_documents(docs, other_docs) {
                return false;
            }
        }
        if self.multi_instances.keys().collect::<Vec<_>>() != other.multi_instances.keys().collect::<Vec<_>>() {
            return false;
        }
        for (name, docs) in &self.multi_instances {
            let other_docs = &other.multi_instances[name];
            if !same_documents(docs, other_docs) {
                return false;
            }
        }
        true
    }

    /// Retain the first `ratio * len` documents of every collection/instance
    /// and regenerate the rest as minimal stand-ins from `schema`-free
    /// placeholder documents carrying only `_id` (spec §4.4 state retention
    /// ratio). Head-retention, not random sampling — see `DESIGN.md`.
    pub fn retain_ratio(&self, ratio: f64) -> SimState {
        let ratio = ratio.clamp(0.0, 1.0);
        let mut out = self.clone();
        for docs in out.collections.values_mut() {
            truncate_and_pad(docs, ratio);
        }
        for docs in out.multi_instances.values_mut() {
            truncate_and_pad(docs, ratio);
        }
        out
    }
}

fn truncate_and_pad(docs: &mut Vec<Document>, ratio: f64) {
    let keep = ((docs.len() as f64) * ratio).round() as usize;
    let total = docs.len();
    docs.truncate(keep);
    for i in keep..total {
        docs.push(doc! { "_id": Bson::String(format!("retained-placeholder-{i}")) });
    }
}

fn same_documents(a: &[Document], b: &[Document]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort_by_key(|d| d.to_string());
    b_sorted.sort_by_key(|d| d.to_string());
    a_sorted == b_sorted
}
