//! Chain resolution: find the root, walk children by parent link, detect
//! branches/cycles, and compute pending suffixes (spec §4.3).

use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, EngineResult};

use super::MigrationDefinition;

/// An ordered, validated, parent-to-leaf migration chain.
#[derive(Debug, Clone)]
pub struct Chain {
    migrations: Vec<MigrationDefinition>,
}

impl Chain {
    pub fn migrations(&self) -> &[MigrationDefinition] {
        &self.migrations
    }

    pub fn get(&self, id: &str) -> Option<&MigrationDefinition> {
        self.migrations.iter().find(|m| m.id == id)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.migrations.iter().position(|m| m.id == id)
    }

    pub fn leaf(&self) -> Option<&MigrationDefinition> {
        self.migrations.last()
    }

    pub fn build(migrations: Vec<MigrationDefinition>) -> EngineResult<Chain> {
        if migrations.is_empty() {
            return Ok(Chain { migrations });
        }

        let by_id: HashMap<&str, &MigrationDefinition> = migrations.iter().map(|m| (m.id.as_str(), m)).collect();

        // Validate every non-root parent reference resolves.
        for m in &migrations {
            if let Some(parent_id) = &m.parent {
                if !by_id.contains_key(parent_id.as_str()) {
                    return Err(EngineError::ChainUnknownParent { id: m.id.clone(), parent_id: parent_id.clone() });
                }
            }
        }

        let roots: Vec<&MigrationDefinition> = migrations.iter().filter(|m| m.parent.is_none()).collect();
        let dir_label = "<registered migrations>".to_string();
        let root = match roots.as_slice() {
            [] => return Err(EngineError::ChainNoRoot { dir: dir_label }),
            [single] => *single,
            many => {
                return Err(EngineError::ChainMultipleRoots {
                    dir: dir_label,
                    ids: many.iter().map(|m| m.id.clone()).collect(),
                })
            }
        };

        // Build children-by-parent map and walk the single path, detecting
        // branches and cycles along the way.
        let mut children_of: HashMap<&str, Vec<&MigrationDefinition>> = HashMap::new();
        for m in &migrations {
            if let Some(parent_id) = &m.parent {
                children_of.entry(parent_id.as_str()).or_default().push(m);
            }
        }

        let mut ordered = Vec::with_capacity(migrations.len());
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = root;
        loop {
            if !visited.insert(current.id.as_str()) {
                return Err(EngineError::ChainBranching { parent_id: current.id.clone(), children: vec![] });
            }
            ordered.push(current.clone());
            let children = children_of.remove(current.id.as_str()).unwrap_or_default();
            match children.as_slice() {
                [] => break,
                [only] => current = only,
                many => {
                    return Err(EngineError::ChainBranching {
                        parent_id: current.id.clone(),
                        children: many.iter().map(|m| m.id.clone()).collect(),
                    })
                }
            }
        }

        if ordered.len() != migrations.len() {
            let unreached: Vec<String> =
                migrations.iter().filter(|m| !ordered.iter().any(|o| o.id == m.id)).map(|m| m.id.clone()).collect();
            return Err(EngineError::ChainUnknownParent {
                id: unreached.first().cloned().unwrap_or_default(),
                parent_id: "<unreachable from root>".to_string(),
            });
        }

        Ok(Chain { migrations: ordered })
    }
}

/// Returns the suffix of `chain` starting at the first migration not present
/// in `applied_ids`. Errors if an applied migration appears after a
/// non-applied one (a "hole", spec §4.3).
pub fn pending_migrations<'a>(chain: &'a Chain, applied_ids: &HashSet<String>) -> EngineResult<&'a [MigrationDefinition]> {
    let migrations = chain.migrations();
    let mut first_pending = None;
    for (i, m) in migrations.iter().enumerate() {
        let is_applied = applied_ids.contains(&m.id);
        match (first_pending, is_applied) {
            (None, false) => first_pending = Some(i),
            (Some(_), true) => return Err(EngineError::ChainHole { id: m.id.clone() }),
            _ => {}
        }
    }
    Ok(&migrations[first_pending.unwrap_or(migrations.len())..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemasDefinition;
    use std::sync::Arc;

    fn def(id: &str, parent: Option<&str>) -> MigrationDefinition {
        MigrationDefinition {
            id: id.to_string(),
            name: id.to_string(),
            parent: parent.map(|p| p.to_string()),
            schemas: Arc::new(SchemasDefinition::default()),
            migrate: Arc::new(|_b| Ok(())),
        }
    }

    #[test]
    fn no_root_is_an_error() {
        let err = Chain::build(vec![def("a", Some("missing"))]).unwrap_err();
        assert!(matches!(err, EngineError::ChainUnknownParent { .. }));
    }

    #[test]
    fn two_roots_is_an_error() {
        let err = Chain::build(vec![def("a", None), def("b", None)]).unwrap_err();
        assert!(matches!(err, EngineError::ChainMultipleRoots { .. }));
    }

    #[test]
    fn branch_is_an_error() {
        let err = Chain::build(vec![def("a", None), def("b", Some("a")), def("c", Some("a"))]).unwrap_err();
        assert!(matches!(err, EngineError::ChainBranching { .. }));
    }

    #[test]
    fn pending_suffix_respects_applied_set() {
        let chain = Chain::build(vec![def("a", None), def("b", Some("a")), def("c", Some("b"))]).unwrap();
        let applied: HashSet<String> = ["a".to_string()].into_iter().collect();
        let pending = pending_migrations(&chain, &applied).unwrap();
        let ids: Vec<_> = pending.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn hole_is_detected() {
        let chain = Chain::build(vec![def("a", None), def("b", Some("a")), def("c", Some("b"))]).unwrap();
        let applied: HashSet<String> = ["a".to_string(), "c".to_string()].into_iter().collect();
        let err = pending_migrations(&chain, &applied).unwrap_err();
        assert!(matches!(err, EngineError::ChainHole { .. }));
    }

    #[test]
    fn pending_suffix_monotonicity() {
        let chain = Chain::build(vec![def("a", None), def("b", Some("a")), def("c", Some("b"))]).unwrap();
        let applied0: HashSet<String> = HashSet::new();
        let pending0 = pending_migrations(&chain, &applied0).unwrap();
        let head = pending0[0].id.clone();
        let applied1: HashSet<String> = [head.clone()].into_iter().collect();
        let pending1 = pending_migrations(&chain, &applied1).unwrap();
        let tail: Vec<_> = pending0[1..].iter().map(|m| m.id.clone()).collect();
        let got: Vec<_> = pending1.iter().map(|m| m.id.clone()).collect();
        assert_eq!(tail, got);
    }
}
