use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::DbId;
use crate::error::KiraError;
use crate::fs_util::write_bytes_atomic;
use crate::graph::{
    Attribute, Class, Entity, InboundReferenceLookup, KnowledgeStore, Relation, Value,
};

#[derive(Debug, Clone, Default)]
struct State {
    next_id: u64,
    entities: BTreeMap<DbId, Entity>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    entities: Vec<Entity>,
}

/// In-memory knowledge store, optionally persisted as a JSON snapshot on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: State,
    checkpoint: Option<State>,
    snapshot_path: Option<Utf8PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the snapshot at `path` when present; commits write back to it.
    pub fn open(path: &Utf8Path) -> Result<Self, KiraError> {
        let mut store = Self::new();
        if path.as_std_path().exists() {
            let content = fs::read_to_string(path.as_std_path())
                .map_err(|err| KiraError::Snapshot(format!("read {path}: {err}")))?;
            let snapshot: Snapshot = serde_json::from_str(&content)
                .map_err(|err| KiraError::Snapshot(format!("parse {path}: {err}")))?;
            store.state = State::from_snapshot(snapshot)?;
        }
        store.snapshot_path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Detaches the snapshot file so commits stay in memory.
    pub fn detached(mut self) -> Self {
        self.snapshot_path = None;
        self
    }

    pub fn snapshot_path(&self) -> Option<&Utf8Path> {
        self.snapshot_path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.state.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entities.is_empty()
    }

    pub fn contains(&self, id: DbId) -> bool {
        self.state.entities.contains_key(&id)
    }

    pub fn in_transaction(&self) -> bool {
        self.checkpoint.is_some()
    }

    /// Restores the state captured by the last `begin_transaction`.
    pub fn rollback(&mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            self.state = checkpoint;
        }
    }

    pub fn save(&self) -> Result<(), KiraError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = Snapshot {
            next_id: self.state.next_id,
            entities: self.state.entities.values().cloned().collect(),
        };
        let content = serde_json::to_vec_pretty(&snapshot)
            .map_err(|err| KiraError::Snapshot(err.to_string()))?;
        write_bytes_atomic(path, &content)
    }
}

impl State {
    fn from_snapshot(snapshot: Snapshot) -> Result<Self, KiraError> {
        let mut entities = BTreeMap::new();
        let mut max_id = 0;
        for entity in snapshot.entities {
            let id = entity
                .id
                .ok_or_else(|| KiraError::Snapshot("snapshot entity without id".to_string()))?;
            max_id = max_id.max(id.value());
            entities.insert(id, entity);
        }
        Ok(Self {
            next_id: snapshot.next_id.max(max_id),
            entities,
        })
    }
}

impl KnowledgeStore for MemoryStore {
    fn find_by_attribute(
        &self,
        class: Class,
        attribute: Attribute,
        value: &Value,
    ) -> Result<Vec<Entity>, KiraError> {
        Ok(self
            .state
            .entities
            .values()
            .filter(|entity| entity.class == class && entity.values(attribute).contains(value))
            .cloned()
            .collect())
    }

    fn find_by_class(&self, class: Class) -> Result<Vec<Entity>, KiraError> {
        Ok(self
            .state
            .entities
            .values()
            .filter(|entity| entity.class == class)
            .cloned()
            .collect())
    }

    fn fetch(&self, id: DbId) -> Result<Entity, KiraError> {
        self.state
            .entities
            .get(&id)
            .cloned()
            .ok_or(KiraError::InstanceNotFound(id.value()))
    }

    fn create(&mut self, entity: &Entity) -> Result<DbId, KiraError> {
        self.state.next_id += 1;
        let id = DbId(self.state.next_id);
        let mut stored = entity.clone();
        stored.id = Some(id);
        self.state.entities.insert(id, stored);
        Ok(id)
    }

    fn update(&mut self, entity: &Entity) -> Result<(), KiraError> {
        let id = entity.id.ok_or_else(|| {
            KiraError::StoreUnavailable(format!("cannot update unsaved {:?}", entity.class))
        })?;
        let slot = self
            .state
            .entities
            .get_mut(&id)
            .ok_or(KiraError::InstanceNotFound(id.value()))?;
        *slot = entity.clone();
        Ok(())
    }

    fn delete(&mut self, id: DbId) -> Result<(), KiraError> {
        self.state
            .entities
            .remove(&id)
            .map(|_| ())
            .ok_or(KiraError::InstanceNotFound(id.value()))
    }

    fn begin_transaction(&mut self) -> Result<(), KiraError> {
        self.checkpoint = Some(self.state.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), KiraError> {
        self.checkpoint = None;
        self.save()
    }
}

impl InboundReferenceLookup for MemoryStore {
    fn referrers(&self, target: DbId, relation: Relation) -> Result<Vec<Entity>, KiraError> {
        let attribute = relation.attribute();
        Ok(self
            .state
            .entities
            .values()
            .filter(|entity| entity.references_target(attribute, target))
            .cloned()
            .collect())
    }
}
