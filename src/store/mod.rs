pub mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::Value;

pub use memory::MemoryStore;

pub type InstanceId = u64;

/// One stored entity instance. Field values are kept by name; tree instances
/// additionally carry the bookkeeping fields the store maintains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub entity: String,
    pub values: BTreeMap<String, Value>,
}

impl Instance {
    pub fn get(&self, field: &str) -> &Value {
        self.values.get(field).unwrap_or(&Value::Null)
    }
}

/// The storage collaborator the importer writes through. One implementation
/// ships with the crate; anything honouring these semantics works.
///
/// Transactions are coarse: `begin` opens one, and everything written until
/// `commit` or `rollback` belongs to it. The importer opens one per entity
/// type.
pub trait EntityStore {
    /// Look an instance up by its ordered natural-key values.
    fn get_by_natural_key(&self, entity: &str, key: &[Value]) -> Result<Option<InstanceId>>;

    /// Upsert keyed on `lookup`; `defaults` are applied on both paths.
    /// Returns the instance id and whether it was created.
    fn create_or_update(
        &mut self,
        entity: &str,
        lookup: &BTreeMap<String, Value>,
        defaults: &BTreeMap<String, Value>,
    ) -> Result<(InstanceId, bool)>;

    /// Create a new root node of a tree entity type.
    fn add_root(&mut self, entity: &str, values: BTreeMap<String, Value>) -> Result<InstanceId>;

    /// Create a new node under `parent`.
    fn add_child(
        &mut self,
        entity: &str,
        parent: InstanceId,
        values: BTreeMap<String, Value>,
    ) -> Result<InstanceId>;

    /// Direct children of a tree node, in tree order.
    fn children(&self, entity: &str, parent: InstanceId) -> Result<Vec<InstanceId>>;

    /// All descendants of a tree node, in tree order.
    fn descendants(&self, entity: &str, node: InstanceId) -> Result<Vec<InstanceId>>;

    fn get(&self, entity: &str, id: InstanceId) -> Option<&Instance>;

    fn all(&self, entity: &str) -> Vec<&Instance>;

    fn begin(&mut self);

    fn commit(&mut self);

    fn rollback(&mut self);
}
