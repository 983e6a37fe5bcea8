use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{EntitySchema, ModuleSchema, Value};
use crate::store::{EntityStore, Instance, InstanceId};

/// Materialized-path segments are fixed-width base-36, so lexicographic path
/// order is tree order.
const PATH_SEGMENT_LEN: usize = 4;
const BASE36_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn base36_segment(mut n: u64) -> String {
    let mut buf = [b'0'; PATH_SEGMENT_LEN];
    for slot in buf.iter_mut().rev() {
        *slot = BASE36_ALPHABET[(n % 36) as usize];
        n /= 36;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    next_id: InstanceId,
    instances: BTreeMap<String, BTreeMap<InstanceId, Instance>>,
}

/// In-memory entity store for one module, with natural-key lookups,
/// materialized-path trees, snapshot transactions, and a JSON on-disk form.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    module: ModuleSchema,
    data: StoreData,
    snapshot: Option<StoreData>,
}

impl MemoryStore {
    pub fn new(module: ModuleSchema) -> Self {
        Self {
            module,
            data: StoreData::default(),
            snapshot: None,
        }
    }

    /// Load the store file if it exists, otherwise start empty.
    pub fn load(path: &Path, module: ModuleSchema) -> Result<Self> {
        let mut store = Self::new(module);
        if path.is_file() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| Error::Store(format!("failed to read {}: {e}", path.display())))?;
            store.data = serde_json::from_str(&raw)
                .map_err(|e| Error::Store(format!("failed to parse {}: {e}", path.display())))?;
            debug!("loaded store from {}", path.display());
        }
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.data)
            .map_err(|e| Error::Store(format!("failed to serialize store: {e}")))?;
        std::fs::write(path, raw)
            .map_err(|e| Error::Store(format!("failed to write {}: {e}", path.display())))?;
        Ok(())
    }

    pub fn module(&self) -> &ModuleSchema {
        &self.module
    }

    fn entity_schema(&self, entity: &str) -> Result<&EntitySchema> {
        self.module
            .get_entity(entity)
            .ok_or_else(|| Error::Store(format!("unknown entity type '{entity}'")))
    }

    fn instances(&self, entity: &str) -> impl Iterator<Item = &Instance> {
        self.data
            .instances
            .get(entity)
            .into_iter()
            .flat_map(|m| m.values())
    }

    fn next_id(&mut self) -> InstanceId {
        self.data.next_id += 1;
        self.data.next_id
    }

    /// Reject writes that would collide with a unique field or the entity's
    /// multi-field unique constraint.
    fn check_unique(
        &self,
        schema: &EntitySchema,
        values: &BTreeMap<String, Value>,
        exclude: Option<InstanceId>,
    ) -> Result<()> {
        for field in &schema.fields {
            if !field.unique {
                continue;
            }
            let candidate = match values.get(&field.name) {
                Some(v) if !v.is_null() => v,
                _ => continue,
            };
            for other in self.instances(&schema.name) {
                if Some(other.id) != exclude && other.get(&field.name) == candidate {
                    return Err(Error::Store(format!(
                        "duplicate value {candidate} for unique field '{}.{}'",
                        schema.name, field.name
                    )));
                }
            }
        }

        if let Some(unique_fields) = &schema.unique_together {
            let candidate: Vec<&Value> = unique_fields
                .iter()
                .map(|f| values.get(f).unwrap_or(&Value::Null))
                .collect();
            if candidate.iter().all(|v| !v.is_null()) {
                for other in self.instances(&schema.name) {
                    if Some(other.id) == exclude {
                        continue;
                    }
                    let existing: Vec<&Value> =
                        unique_fields.iter().map(|f| other.get(f)).collect();
                    if existing == candidate {
                        return Err(Error::Store(format!(
                            "duplicate values for unique constraint {unique_fields:?} on '{}'",
                            schema.name
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    fn insert(&mut self, entity: &str, values: BTreeMap<String, Value>) -> Result<InstanceId> {
        let schema = self.entity_schema(entity)?.clone();
        self.check_unique(&schema, &values, None)?;
        let id = self.next_id();
        let instance = Instance {
            id,
            entity: entity.to_string(),
            values,
        };
        self.data
            .instances
            .entry(entity.to_string())
            .or_default()
            .insert(id, instance);
        Ok(id)
    }

    fn path_of(&self, entity: &str, id: InstanceId) -> Result<String> {
        let instance = self
            .get(entity, id)
            .ok_or_else(|| Error::Store(format!("no {entity} instance with id {id}")))?;
        match instance.get("path") {
            Value::Text(path) => Ok(path.clone()),
            _ => Err(Error::Store(format!(
                "{entity} instance {id} has no tree path"
            ))),
        }
    }
}

impl EntityStore for MemoryStore {
    fn get_by_natural_key(&self, entity: &str, key: &[Value]) -> Result<Option<InstanceId>> {
        let schema = self.entity_schema(entity)?;
        if key.len() != schema.natural_key.len() {
            return Err(Error::Store(format!(
                "natural key for '{entity}' takes {} values, got {}",
                schema.natural_key.len(),
                key.len()
            )));
        }
        let found = self.instances(entity).find(|instance| {
            schema
                .natural_key
                .iter()
                .zip(key)
                .all(|(field, value)| instance.get(field) == value)
        });
        Ok(found.map(|i| i.id))
    }

    fn create_or_update(
        &mut self,
        entity: &str,
        lookup: &BTreeMap<String, Value>,
        defaults: &BTreeMap<String, Value>,
    ) -> Result<(InstanceId, bool)> {
        let existing = {
            let _ = self.entity_schema(entity)?;
            self.instances(entity)
                .find(|instance| lookup.iter().all(|(field, value)| instance.get(field) == value))
                .map(|i| i.id)
        };

        let mut values = defaults.clone();
        values.extend(lookup.clone());

        match existing {
            Some(id) => {
                let schema = self.entity_schema(entity)?.clone();
                self.check_unique(&schema, &values, Some(id))?;
                let instance = self
                    .data
                    .instances
                    .get_mut(entity)
                    .and_then(|m| m.get_mut(&id))
                    .expect("instance disappeared between lookup and update");
                instance.values.extend(values);
                Ok((id, false))
            }
            None => {
                let id = self.insert(entity, values)?;
                Ok((id, true))
            }
        }
    }

    fn add_root(&mut self, entity: &str, values: BTreeMap<String, Value>) -> Result<InstanceId> {
        let schema = self.entity_schema(entity)?;
        if !schema.is_tree() {
            return Err(Error::Store(format!("'{entity}' is not a tree entity")));
        }
        let roots = self
            .instances(entity)
            .filter(|i| i.get("depth") == &Value::Integer(1))
            .count() as u64;

        let mut values = values;
        values.insert("path".to_string(), Value::Text(base36_segment(roots + 1)));
        values.insert("depth".to_string(), Value::Integer(1));
        values.insert("numchild".to_string(), Value::Integer(0));
        self.insert(entity, values)
    }

    fn add_child(
        &mut self,
        entity: &str,
        parent: InstanceId,
        values: BTreeMap<String, Value>,
    ) -> Result<InstanceId> {
        let parent_path = self.path_of(entity, parent)?;
        let parent_instance = self
            .get(entity, parent)
            .ok_or_else(|| Error::Store(format!("no {entity} instance with id {parent}")))?;
        let parent_depth = match parent_instance.get("depth") {
            Value::Integer(d) => *d,
            _ => return Err(Error::Store(format!("{entity} instance {parent} has no depth"))),
        };
        let child_seq = match parent_instance.get("numchild") {
            Value::Integer(n) => *n as u64 + 1,
            _ => 1,
        };

        let mut values = values;
        values.insert(
            "path".to_string(),
            Value::Text(format!("{parent_path}{}", base36_segment(child_seq))),
        );
        values.insert("depth".to_string(), Value::Integer(parent_depth + 1));
        values.insert("numchild".to_string(), Value::Integer(0));
        let id = self.insert(entity, values)?;

        let parent_instance = self
            .data
            .instances
            .get_mut(entity)
            .and_then(|m| m.get_mut(&parent))
            .expect("parent disappeared during add_child");
        parent_instance
            .values
            .insert("numchild".to_string(), Value::Integer(child_seq as i64));
        Ok(id)
    }

    fn children(&self, entity: &str, parent: InstanceId) -> Result<Vec<InstanceId>> {
        let parent_path = self.path_of(entity, parent)?;
        let mut nodes: Vec<(&String, InstanceId)> = self
            .instances(entity)
            .filter_map(|i| match i.get("path") {
                Value::Text(path)
                    if path.starts_with(&parent_path)
                        && path.len() == parent_path.len() + PATH_SEGMENT_LEN =>
                {
                    Some((path, i.id))
                }
                _ => None,
            })
            .collect();
        nodes.sort();
        Ok(nodes.into_iter().map(|(_, id)| id).collect())
    }

    fn descendants(&self, entity: &str, node: InstanceId) -> Result<Vec<InstanceId>> {
        let node_path = self.path_of(entity, node)?;
        let mut nodes: Vec<(&String, InstanceId)> = self
            .instances(entity)
            .filter_map(|i| match i.get("path") {
                Value::Text(path)
                    if path.starts_with(&node_path) && path.len() > node_path.len() =>
                {
                    Some((path, i.id))
                }
                _ => None,
            })
            .collect();
        nodes.sort();
        Ok(nodes.into_iter().map(|(_, id)| id).collect())
    }

    fn get(&self, entity: &str, id: InstanceId) -> Option<&Instance> {
        self.data.instances.get(entity).and_then(|m| m.get(&id))
    }

    fn all(&self, entity: &str) -> Vec<&Instance> {
        self.instances(entity).collect()
    }

    fn begin(&mut self) {
        self.snapshot = Some(self.data.clone());
    }

    fn commit(&mut self) {
        self.snapshot = None;
    }

    fn rollback(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.data = snapshot;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntitySchema, FieldSchema};

    fn tree_module() -> ModuleSchema {
        ModuleSchema::new("test").entity(
            EntitySchema::tree("Unit")
                .field(FieldSchema::text("code").unique())
                .natural_key(&["code"]),
        )
    }

    fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn create_or_update_round_trips() {
        let module = ModuleSchema::new("test").entity(
            EntitySchema::flat("Measure")
                .field(FieldSchema::text("name").unique())
                .field(FieldSchema::integer("rank"))
                .natural_key(&["name"]),
        );
        let mut store = MemoryStore::new(module);

        let lookup = values(&[("name", Value::from("Actual"))]);
        let (id, created) = store
            .create_or_update("Measure", &lookup, &values(&[("rank", Value::Integer(1))]))
            .unwrap();
        assert!(created);

        let (id2, created) = store
            .create_or_update("Measure", &lookup, &values(&[("rank", Value::Integer(2))]))
            .unwrap();
        assert!(!created);
        assert_eq!(id, id2);
        assert_eq!(store.get("Measure", id).unwrap().get("rank"), &Value::Integer(2));
    }

    #[test]
    fn unique_field_collision_is_rejected() {
        let module = ModuleSchema::new("test").entity(
            EntitySchema::flat("Measure")
                .field(FieldSchema::text("name").unique())
                .field(FieldSchema::text("slug").unique())
                .natural_key(&["name"]),
        );
        let mut store = MemoryStore::new(module);
        store
            .create_or_update(
                "Measure",
                &values(&[("name", Value::from("Actual"))]),
                &values(&[("slug", Value::from("act"))]),
            )
            .unwrap();
        let err = store
            .create_or_update(
                "Measure",
                &values(&[("name", Value::from("Budget"))]),
                &values(&[("slug", Value::from("act"))]),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn tree_paths_follow_materialized_path_layout() {
        let mut store = MemoryStore::new(tree_module());
        let root = store
            .add_root("Unit", values(&[("code", Value::from("ROOT"))]))
            .unwrap();
        let child = store
            .add_child("Unit", root, values(&[("code", Value::from("CHILD"))]))
            .unwrap();
        let grandchild = store
            .add_child("Unit", child, values(&[("code", Value::from("GRAND"))]))
            .unwrap();

        assert_eq!(store.get("Unit", root).unwrap().get("path"), &Value::from("0001"));
        assert_eq!(store.get("Unit", child).unwrap().get("path"), &Value::from("00010001"));
        assert_eq!(store.children("Unit", root).unwrap(), vec![child]);
        assert_eq!(
            store.descendants("Unit", root).unwrap(),
            vec![child, grandchild]
        );
        assert_eq!(
            store.get("Unit", root).unwrap().get("numchild"),
            &Value::Integer(1)
        );
    }

    #[test]
    fn rollback_restores_the_pre_transaction_state() {
        let mut store = MemoryStore::new(tree_module());
        store.begin();
        store
            .add_root("Unit", values(&[("code", Value::from("ROOT"))]))
            .unwrap();
        assert_eq!(store.all("Unit").len(), 1);
        store.rollback();
        assert!(store.all("Unit").is_empty());
    }

    #[test]
    fn natural_key_lookup_matches_ordered_values() {
        let mut store = MemoryStore::new(tree_module());
        let root = store
            .add_root("Unit", values(&[("code", Value::from("ROOT"))]))
            .unwrap();
        assert_eq!(
            store
                .get_by_natural_key("Unit", &[Value::from("ROOT")])
                .unwrap(),
            Some(root)
        );
        assert_eq!(
            store
                .get_by_natural_key("Unit", &[Value::from("NOPE")])
                .unwrap(),
            None
        );
    }
}
