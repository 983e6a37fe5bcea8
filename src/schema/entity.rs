use crate::schema::Value;

/// Field names maintained by the tree storage itself. Never exported to a
/// template and never accepted from one.
pub const TREE_AUTO_FIELDS: [&str; 3] = ["path", "depth", "numchild"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Flat,
    Tree,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Date,
    Boolean,
    ForeignKey { target: String },
}

/// One declared field of an entity type.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: String,
    pub ty: FieldType,
    pub nullable: bool,
    pub unique: bool,
    /// Enumerated (stored value, display label) pairs, empty for free fields.
    pub choices: Vec<(Value, String)>,
}

impl FieldSchema {
    pub fn new(name: &str, ty: FieldType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: false,
            unique: false,
            choices: Vec::new(),
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn decimal(name: &str) -> Self {
        Self::new(name, FieldType::Decimal)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, FieldType::Date)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn foreign_key(name: &str, target: &str) -> Self {
        Self::new(
            name,
            FieldType::ForeignKey {
                target: target.to_string(),
            },
        )
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn choices(mut self, choices: Vec<(Value, String)>) -> Self {
        self.choices = choices;
        self
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.ty, FieldType::ForeignKey { .. })
    }

    /// Foreign-key target entity name, if this field is a relation.
    pub fn relation_target(&self) -> Option<&str> {
        match &self.ty {
            FieldType::ForeignKey { target } => Some(target),
            _ => None,
        }
    }
}

/// One declared, storage-backed entity type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: String,
    pub kind: EntityKind,
    pub fields: Vec<FieldSchema>,
    /// Ordered field names uniquely identifying an instance. Every entity
    /// type declares this directly; it is the lookup contract the store and
    /// the resolver share.
    pub natural_key: Vec<String>,
    /// Optional multi-field uniqueness constraint. A foreign key pointing at
    /// an entity with one is exported as one column per constrained field.
    pub unique_together: Option<Vec<String>>,
}

impl EntitySchema {
    pub fn flat(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EntityKind::Flat,
            fields: Vec::new(),
            natural_key: Vec::new(),
            unique_together: None,
        }
    }

    /// A tree entity carries the bookkeeping fields the tree store maintains.
    pub fn tree(name: &str) -> Self {
        let mut schema = Self {
            name: name.to_string(),
            kind: EntityKind::Tree,
            fields: Vec::new(),
            natural_key: Vec::new(),
            unique_together: None,
        };
        schema.fields.push(FieldSchema::text("path").unique());
        schema.fields.push(FieldSchema::integer("depth"));
        schema.fields.push(FieldSchema::integer("numchild"));
        schema
    }

    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn natural_key(mut self, fields: &[&str]) -> Self {
        self.natural_key = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn unique_together(mut self, fields: &[&str]) -> Self {
        self.unique_together = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_tree(&self) -> bool {
        self.kind == EntityKind::Tree
    }
}

/// A named application module: an ordered set of entity types. Declaration
/// order drives worksheet order on generation and processing order on import.
#[derive(Debug, Clone)]
pub struct ModuleSchema {
    pub name: String,
    pub entities: Vec<EntitySchema>,
}

impl ModuleSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entities: Vec::new(),
        }
    }

    pub fn entity(mut self, entity: EntitySchema) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn get_entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.iter().find(|e| e.name == name)
    }
}
