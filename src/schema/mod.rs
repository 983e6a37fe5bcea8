pub mod entity;
pub mod fiscal;
pub mod metadata;
pub mod registry;
pub mod value;

pub use entity::{EntityKind, EntitySchema, FieldSchema, FieldType, ModuleSchema, TREE_AUTO_FIELDS};
pub use registry::ModuleRegistry;
pub use value::Value;
