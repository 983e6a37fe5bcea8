//! Label and natural-key resolution for the import path.
//!
//! Spreadsheet cells carry human-readable choice labels and natural-key
//! values; the store holds stored values and instance references. Everything
//! that crosses that boundary goes through here.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::{Error, Result, ValidationError};
use crate::schema::{EntitySchema, FieldSchema, FieldType, ModuleSchema, Value};
use crate::store::EntityStore;

/// Choice label-to-value mappings accumulated over one import run, keyed by
/// (entity, field). Explicit state passed through the row pipeline; never
/// shared across runs.
#[derive(Debug, Default)]
pub struct ChoiceMaps {
    maps: HashMap<(String, String), HashMap<String, Value>>,
}

impl ChoiceMaps {
    pub fn insert(&mut self, entity: &str, field: &str, choices: &[(Value, String)]) {
        let map = choices
            .iter()
            .map(|(value, label)| (label.clone(), value.clone()))
            .collect();
        self.maps
            .insert((entity.to_string(), field.to_string()), map);
    }

    pub fn contains(&self, entity: &str, field: &str) -> bool {
        self.maps
            .contains_key(&(entity.to_string(), field.to_string()))
    }

    /// Map a display label to its stored value.
    pub fn map_label(&self, entity: &str, field: &str, label: &Value) -> Result<Value> {
        let label_text = label.to_string();
        self.maps
            .get(&(entity.to_string(), field.to_string()))
            .and_then(|map| map.get(&label_text))
            .cloned()
            .ok_or_else(|| {
                Error::Validation(ValidationError::InvalidChoice {
                    entity: entity.to_string(),
                    field: field.to_string(),
                    label: label_text,
                })
            })
    }
}

/// The ordered field names that uniquely identify an instance of an entity
/// type. Every type declares these; an empty declaration is a schema defect.
pub fn natural_key_fields<'a>(entity: &'a EntitySchema) -> Result<&'a [String]> {
    if entity.natural_key.is_empty() {
        return Err(Error::Configuration(format!(
            "entity '{}' declares no natural key",
            entity.name
        )));
    }
    Ok(&entity.natural_key)
}

/// Clean one simple-column cell value according to the field's role:
/// choice labels map to stored values, foreign keys resolve to instance
/// references, everything else coerces to the field's value type. Nulls pass
/// through; missing-key handling belongs to the row pipeline.
pub fn clean_field_value(
    store: &dyn EntityStore,
    module: &ModuleSchema,
    entity: &EntitySchema,
    field: &FieldSchema,
    raw: &Value,
    choice_maps: &ChoiceMaps,
) -> Result<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    if !field.choices.is_empty() {
        return choice_maps.map_label(&entity.name, &field.name, raw);
    }
    if field.is_relation() {
        let raw_key = [raw.clone()];
        return resolve_foreign_key(store, module, field, &raw_key, choice_maps);
    }
    coerce_value(raw, &field.ty, &field.name)
}

/// Resolve a foreign-key cell (or compound cell group) to the referenced
/// instance. Components are resolved in natural-key order: choice labels map
/// through the target's choice maps, components that are themselves
/// relations resolve one level deep (single-field keys only), and the fully
/// resolved tuple is looked up on the target type.
pub fn resolve_foreign_key(
    store: &dyn EntityStore,
    module: &ModuleSchema,
    field: &FieldSchema,
    raw_key: &[Value],
    choice_maps: &ChoiceMaps,
) -> Result<Value> {
    let target_name = field.relation_target().ok_or_else(|| {
        Error::Configuration(format!("field '{}' is not a foreign key", field.name))
    })?;
    let target = module.get_entity(target_name).ok_or_else(|| {
        Error::Configuration(format!("unknown entity '{target_name}'"))
    })?;
    let key_fields = natural_key_fields(target)?;

    if raw_key.len() != key_fields.len() {
        return Err(Error::Configuration(format!(
            "natural key for '{target_name}' takes {} values, got {}",
            key_fields.len(),
            raw_key.len()
        )));
    }

    let mut cleaned_key = Vec::with_capacity(key_fields.len());
    for (key_part, raw_value) in key_fields.iter().zip(raw_key) {
        let rel_field = target.get_field(key_part).ok_or_else(|| {
            Error::Configuration(format!(
                "natural key of '{target_name}' names unknown field '{key_part}'"
            ))
        })?;
        let value = resolve_key_component(store, module, target, rel_field, raw_value, choice_maps)?;
        cleaned_key.push(value);
    }

    match store.get_by_natural_key(target_name, &cleaned_key)? {
        Some(id) => Ok(Value::Ref(id)),
        None => Err(Error::Validation(ValidationError::NotFound {
            entity: target_name.to_string(),
            key: cleaned_key,
        })),
    }
}

fn resolve_key_component(
    store: &dyn EntityStore,
    module: &ModuleSchema,
    target: &EntitySchema,
    rel_field: &FieldSchema,
    raw_value: &Value,
    choice_maps: &ChoiceMaps,
) -> Result<Value> {
    if raw_value.is_null() {
        return Ok(Value::Null);
    }

    if !rel_field.choices.is_empty() {
        return choice_maps.map_label(&target.name, &rel_field.name, raw_value);
    }

    if let Some(nested_name) = rel_field.relation_target() {
        let nested = module.get_entity(nested_name).ok_or_else(|| {
            Error::Configuration(format!("unknown entity '{nested_name}'"))
        })?;
        let nested_key = natural_key_fields(nested)?;
        if nested_key.len() != 1 {
            return Err(Error::NotSupported(format!(
                "compound nested natural keys are not supported for foreign key '{}': {nested_key:?}",
                rel_field.name
            )));
        }
        let nested_field = nested.get_field(&nested_key[0]).ok_or_else(|| {
            Error::Configuration(format!(
                "natural key of '{nested_name}' names unknown field '{}'",
                nested_key[0]
            ))
        })?;

        let mut value = raw_value.clone();
        if !nested_field.choices.is_empty() && choice_maps.contains(nested_name, &nested_field.name)
        {
            value = choice_maps.map_label(nested_name, &nested_field.name, &value)?;
        } else {
            value = coerce_value(&value, &nested_field.ty, &nested_field.name)?;
        }

        return match store.get_by_natural_key(nested_name, &[value.clone()])? {
            Some(id) => Ok(Value::Ref(id)),
            None => Err(Error::Validation(ValidationError::NotFound {
                entity: nested_name.to_string(),
                key: vec![value],
            })),
        };
    }

    coerce_value(raw_value, &rel_field.ty, &rel_field.name)
}

/// Fit a raw cell value to a field's declared type. Spreadsheet cells only
/// distinguish text, numbers, booleans and dates, so text forms of the
/// richer types are accepted.
pub fn coerce_value(raw: &Value, ty: &FieldType, field: &str) -> Result<Value> {
    let invalid = |expected: &'static str| {
        Error::Validation(ValidationError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            expected,
        })
    };

    match ty {
        FieldType::Text => Ok(match raw {
            Value::Text(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }),
        FieldType::Integer => match raw {
            Value::Integer(n) => Ok(Value::Integer(*n)),
            Value::Decimal(d) if d.fract().is_zero() => d
                .trunc()
                .try_into()
                .map(Value::Integer)
                .map_err(|_| invalid("an integer")),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| invalid("an integer")),
            _ => Err(invalid("an integer")),
        },
        FieldType::Decimal => match raw {
            Value::Decimal(d) => Ok(Value::Decimal(*d)),
            Value::Integer(n) => Ok(Value::Decimal(Decimal::from(*n))),
            Value::Text(s) => Decimal::from_str(s.trim())
                .map(Value::Decimal)
                .map_err(|_| invalid("a decimal number")),
            _ => Err(invalid("a decimal number")),
        },
        FieldType::Date => match raw {
            Value::Date(d) => Ok(Value::Date(*d)),
            Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| invalid("a date (YYYY-MM-DD)")),
            _ => Err(invalid("a date (YYYY-MM-DD)")),
        },
        FieldType::Boolean => match raw {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
                "TRUE" => Ok(Value::Bool(true)),
                "FALSE" => Ok(Value::Bool(false)),
                _ => Err(invalid("TRUE or FALSE")),
            },
            _ => Err(invalid("TRUE or FALSE")),
        },
        FieldType::ForeignKey { .. } => Ok(raw.clone()),
    }
}
