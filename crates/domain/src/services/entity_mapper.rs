//! Source-ID to target-ID tables, built up as entities are created.

use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{EntityKind, SourceId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("{kind} {source_id} is already mapped to {existing}, refusing {attempted}")]
    Conflict {
        kind: EntityKind,
        source_id: String,
        existing: Uuid,
        attempted: Uuid,
    },

    #[error("{kind} {source_id} is not mapped")]
    NotMapped { kind: EntityKind, source_id: String },
}

/// Per-kind mapping from source identifiers to minted target identifiers.
#[derive(Debug, Clone, Default)]
pub struct EntityMapper {
    tables: HashMap<EntityKind, HashMap<String, Uuid>>,
}

impl EntityMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a mapping entry.
    ///
    /// Recording the same pair twice is a no-op; recording a different target
    /// for an already mapped source ID fails and leaves the table unchanged.
    pub fn record(
        &mut self,
        kind: EntityKind,
        source_id: &SourceId,
        new_id: Uuid,
    ) -> Result<(), MappingError> {
        let table = self.tables.entry(kind).or_default();
        let key = source_id.to_string();
        match table.get(&key) {
            Some(existing) if *existing == new_id => Ok(()),
            Some(existing) => Err(MappingError::Conflict {
                kind,
                source_id: key,
                existing: *existing,
                attempted: new_id,
            }),
            None => {
                table.insert(key, new_id);
                Ok(())
            }
        }
    }

    pub fn resolve(&self, kind: EntityKind, source_id: &SourceId) -> Result<Uuid, MappingError> {
        self.lookup(kind, source_id)
            .ok_or_else(|| MappingError::NotMapped {
                kind,
                source_id: source_id.to_string(),
            })
    }

    pub fn lookup(&self, kind: EntityKind, source_id: &SourceId) -> Option<Uuid> {
        self.tables
            .get(&kind)
            .and_then(|table| table.get(&source_id.to_string()))
            .copied()
    }

    pub fn is_mapped(&self, kind: EntityKind, source_id: &SourceId) -> bool {
        self.lookup(kind, source_id).is_some()
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.tables.get(&kind).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(HashMap::is_empty)
    }

    /// Ordered copy of every table, as exposed on the result.
    pub fn snapshot(&self) -> BTreeMap<EntityKind, BTreeMap<String, Uuid>> {
        self.tables
            .iter()
            .filter(|(_, table)| !table.is_empty())
            .map(|(kind, table)| {
                let ordered = table.iter().map(|(k, v)| (k.clone(), *v)).collect();
                (*kind, ordered)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_resolve() {
        let mut mapper = EntityMapper::new();
        let id = Uuid::new_v4();
        mapper.record(EntityKind::User, &SourceId::from(1), id).unwrap();

        assert_eq!(mapper.resolve(EntityKind::User, &SourceId::from(1)), Ok(id));
        assert!(mapper.is_mapped(EntityKind::User, &SourceId::from(1)));
        assert_eq!(mapper.len(EntityKind::User), 1);
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut mapper = EntityMapper::new();
        let id = Uuid::new_v4();
        mapper.record(EntityKind::Post, &"abc".into(), id).unwrap();
        mapper.record(EntityKind::Post, &"abc".into(), id).unwrap();
        assert_eq!(mapper.len(EntityKind::Post), 1);
    }

    #[test]
    fn test_conflicting_record_fails() {
        let mut mapper = EntityMapper::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        mapper.record(EntityKind::Post, &"abc".into(), first).unwrap();

        let err = mapper
            .record(EntityKind::Post, &"abc".into(), second)
            .unwrap_err();
        assert!(matches!(err, MappingError::Conflict { existing, .. } if existing == first));
        assert_eq!(mapper.lookup(EntityKind::Post, &"abc".into()), Some(first));
    }

    #[test]
    fn test_kinds_are_separate_namespaces() {
        let mut mapper = EntityMapper::new();
        let user = Uuid::new_v4();
        mapper.record(EntityKind::User, &SourceId::from(5), user).unwrap();

        let err = mapper.resolve(EntityKind::Post, &SourceId::from(5)).unwrap_err();
        assert_eq!(err.to_string(), "post 5 is not mapped");
    }

    #[test]
    fn test_snapshot_is_ordered_and_skips_empty() {
        let mut mapper = EntityMapper::new();
        assert!(mapper.is_empty());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        mapper.record(EntityKind::User, &SourceId::from(2), b).unwrap();
        mapper.record(EntityKind::User, &SourceId::from(1), a).unwrap();

        let snapshot = mapper.snapshot();
        assert_eq!(snapshot.len(), 1);
        let users: Vec<_> = snapshot[&EntityKind::User].iter().collect();
        assert_eq!(users, vec![(&"1".to_string(), &a), (&"2".to_string(), &b)]);
    }
}
