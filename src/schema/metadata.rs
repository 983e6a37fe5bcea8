use log::debug;

use crate::error::{Error, Result};
use crate::schema::{EntitySchema, ModuleSchema, TREE_AUTO_FIELDS, Value};

/// Separator between a foreign-key field and a natural-key component in a
/// compound column header. Kept out of logical names, which join on a space.
pub const HEADER_SEPARATOR: char = '\n';

/// Run-time description of one entity type, derived from the declared schema
/// by a single classification pass. Everything downstream of the reader
/// consumes descriptors, never the raw schema.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub name: String,
    pub hierarchical: bool,
    pub fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    /// The field used as the display key when a foreign key points here
    /// without an explicit uniqueness constraint. First exportable column by
    /// convention; uniqueness is not verified.
    pub fn first_field(&self) -> Result<&FieldDescriptor> {
        self.fields.first().ok_or_else(|| {
            Error::Configuration(format!("entity '{}' has no exportable fields", self.name))
        })
    }
}

/// One spreadsheet column of an entity worksheet.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Logical column name; compound foreign-key columns join the field and
    /// the key component with a space.
    pub field: String,
    /// Display header; compound columns stack field and component with a
    /// newline.
    pub header: String,
    pub nullable: bool,
    pub role: FieldRole,
}

#[derive(Debug, Clone)]
pub enum FieldRole {
    Plain,
    ForeignKey {
        target: String,
        /// For a compound column, the natural-key component on the target
        /// this column carries. `None` means the single-column form that
        /// references the target's first exportable field.
        resolved_field: Option<String>,
    },
    Choice {
        choices: Vec<(Value, String)>,
    },
    Boolean,
    TreeParent,
}

impl FieldRole {
    pub fn is_foreign_key(&self) -> bool {
        matches!(self, FieldRole::ForeignKey { .. })
    }
}

/// Derive descriptors for every entity type of a module, in declaration
/// order. Recomputed on every call so a template run and a later import run
/// each see the schema as it stands.
pub fn read_module(module: &ModuleSchema) -> Result<Vec<EntityDescriptor>> {
    let mut descriptors = Vec::new();
    for entity in &module.entities {
        descriptors.push(EntityDescriptor {
            name: entity.name.clone(),
            hierarchical: entity.is_tree(),
            fields: exportable_fields(module, entity)?,
        });
    }
    debug!(
        "read {} entity descriptors for module '{}'",
        descriptors.len(),
        module.name
    );
    Ok(descriptors)
}

/// The exportable columns of one entity type: declared fields minus tree
/// bookkeeping, foreign keys expanded per the target's uniqueness
/// constraint, plus the synthetic parent column for tree types.
pub fn exportable_fields(
    module: &ModuleSchema,
    entity: &EntitySchema,
) -> Result<Vec<FieldDescriptor>> {
    let mut export_fields = Vec::new();

    for field in &entity.fields {
        if TREE_AUTO_FIELDS.contains(&field.name.as_str()) {
            continue;
        }

        if let Some(target) = field.relation_target() {
            let related = module.get_entity(target).ok_or_else(|| {
                Error::Configuration(format!(
                    "field '{}.{}' references unknown entity '{target}'",
                    entity.name, field.name
                ))
            })?;

            if let Some(unique_fields) = &related.unique_together {
                for unique_field in unique_fields {
                    if related.get_field(unique_field).is_none() {
                        return Err(Error::Configuration(format!(
                            "unique constraint on '{}' names unknown field '{unique_field}'",
                            related.name
                        )));
                    }
                    export_fields.push(FieldDescriptor {
                        field: format!("{} {}", field.name, unique_field),
                        header: format!("{}{}{}", field.name, HEADER_SEPARATOR, unique_field),
                        nullable: field.nullable,
                        role: FieldRole::ForeignKey {
                            target: target.to_string(),
                            resolved_field: Some(unique_field.clone()),
                        },
                    });
                }
            } else {
                export_fields.push(FieldDescriptor {
                    field: field.name.clone(),
                    header: field.name.clone(),
                    nullable: field.nullable,
                    role: FieldRole::ForeignKey {
                        target: target.to_string(),
                        resolved_field: None,
                    },
                });
            }
        } else if !field.choices.is_empty() {
            export_fields.push(FieldDescriptor {
                field: field.name.clone(),
                header: field.name.clone(),
                nullable: field.nullable,
                role: FieldRole::Choice {
                    choices: field.choices.clone(),
                },
            });
        } else if field.ty == crate::schema::FieldType::Boolean {
            export_fields.push(FieldDescriptor {
                field: field.name.clone(),
                header: field.name.clone(),
                nullable: field.nullable,
                role: FieldRole::Boolean,
            });
        } else {
            export_fields.push(FieldDescriptor {
                field: field.name.clone(),
                header: field.name.clone(),
                nullable: field.nullable,
                role: FieldRole::Plain,
            });
        }
    }

    if entity.is_tree() {
        // Nullable so a blank cell can create a root node.
        export_fields.push(FieldDescriptor {
            field: "parent".to_string(),
            header: "parent".to_string(),
            nullable: true,
            role: FieldRole::TreeParent,
        });
    }

    Ok(export_fields)
}
