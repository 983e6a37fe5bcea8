use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use calamine::{Data, Reader, Xlsx, open_workbook};
use log::debug;
use rust_decimal::Decimal;

use crate::error::{Error, Result, ValidationError};
use crate::excel::resolver::{self, ChoiceMaps};
use crate::excel::template_builder::MODULE_TAG;
use crate::schema::metadata::HEADER_SEPARATOR;
use crate::schema::{EntitySchema, FieldSchema, ModuleSchema, TREE_AUTO_FIELDS, Value};
use crate::store::EntityStore;

/// Per-entity-type outcome of one import run. Lines are human-readable; the
/// caller only prints them.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub successes: Vec<String>,
    pub failures: Vec<String>,
}

/// Imports a populated template workbook into the store, one entity type per
/// worksheet, resolving choice labels and natural keys as it goes.
///
/// Each entity type runs in its own store transaction: a failure rolls that
/// type back completely and processing moves on to the next type.
pub struct WorkbookImporter {
    path: PathBuf,
    module: ModuleSchema,
    entity_filter: Option<String>,
}

impl WorkbookImporter {
    pub fn new<P: AsRef<Path>>(path: P, module: ModuleSchema) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            module,
            entity_filter: None,
        }
    }

    /// Restrict the run to a single entity type's worksheet.
    pub fn with_entity_filter(mut self, entity: Option<String>) -> Self {
        self.entity_filter = entity;
        self
    }

    pub fn import(&self, store: &mut dyn EntityStore) -> Result<ImportReport> {
        let mut workbook: Xlsx<_> = open_workbook(&self.path)?;
        self.validate_module_tag(&workbook)?;
        workbook.load_tables()?;
        let sheet_names = workbook.sheet_names().to_owned();

        let mut choice_maps = ChoiceMaps::default();
        let mut report = ImportReport::default();

        for entity in &self.module.entities {
            if let Some(filter) = &self.entity_filter {
                if filter != &entity.name {
                    continue;
                }
            }
            if !sheet_names.contains(&entity.name) {
                continue;
            }
            // A sheet without a matching table is not a template sheet.
            let table = match workbook.table_by_name(&entity.name) {
                Ok(table) => table,
                Err(_) => {
                    debug!("sheet '{}' has no matching table, skipping", entity.name);
                    continue;
                }
            };
            if table.sheet_name() != entity.name {
                continue;
            }

            self.prime_choice_maps(entity, &mut choice_maps)?;

            let headers: Vec<String> = table.columns().to_vec();
            let rows: Vec<Vec<Data>> = table.data().rows().map(|r| r.to_vec()).collect();

            store.begin();
            match self.import_entity_rows(store, entity, &headers, &rows, &choice_maps) {
                Ok((created, updated)) => {
                    store.commit();
                    report.successes.push(format!(
                        "{}: {created} created, {updated} updated",
                        entity.name
                    ));
                }
                Err(err) => {
                    store.rollback();
                    report
                        .failures
                        .push(format!("{}: {err}\n{err:?}", entity.name));
                }
            }
        }

        Ok(report)
    }

    fn validate_module_tag<R>(&self, workbook: &Xlsx<R>) -> Result<()>
    where
        R: std::io::Read + std::io::Seek,
    {
        if let Some((_, raw)) = workbook
            .defined_names()
            .iter()
            .find(|(name, _)| name == MODULE_TAG)
        {
            let tagged = raw.trim().trim_matches('"');
            if !tagged.is_empty() && tagged != self.module.name {
                return Err(Error::Validation(ValidationError::ModuleMismatch {
                    found: tagged.to_string(),
                    expected: self.module.name.clone(),
                }));
            }
        }
        Ok(())
    }

    /// Register the choice maps row processing will need: this type's own
    /// choice fields, the choice fields among each foreign-key target's
    /// natural-key components, and one nested level below those for
    /// compound-key components that are themselves relations.
    fn prime_choice_maps(&self, entity: &EntitySchema, maps: &mut ChoiceMaps) -> Result<()> {
        for field in &entity.fields {
            if !field.choices.is_empty() {
                maps.insert(&entity.name, &field.name, &field.choices);
            }
            let Some(target_name) = field.relation_target() else {
                continue;
            };
            let target = self.module.get_entity(target_name).ok_or_else(|| {
                Error::Configuration(format!("unknown entity '{target_name}'"))
            })?;
            for key_field in resolver::natural_key_fields(target)? {
                let Some(rel_field) = target.get_field(key_field) else {
                    continue;
                };
                if !rel_field.choices.is_empty() {
                    maps.insert(target_name, key_field, &rel_field.choices);
                }
                if let Some(nested_name) = rel_field.relation_target() {
                    let nested = self.module.get_entity(nested_name).ok_or_else(|| {
                        Error::Configuration(format!("unknown entity '{nested_name}'"))
                    })?;
                    if let [nested_key] = nested.natural_key.as_slice() {
                        if let Some(nested_field) = nested.get_field(nested_key) {
                            if !nested_field.choices.is_empty() {
                                maps.insert(nested_name, nested_key, &nested_field.choices);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn import_entity_rows(
        &self,
        store: &mut dyn EntityStore,
        entity: &EntitySchema,
        headers: &[String],
        rows: &[Vec<Data>],
        choice_maps: &ChoiceMaps,
    ) -> Result<(u64, u64)> {
        let field_map = entity_fields(entity);
        let key_fields = resolver::natural_key_fields(entity)?.to_vec();

        let mut created_count = 0u64;
        let mut updated_count = 0u64;

        for row in rows {
            let cells: Vec<Value> = row.iter().map(cell_to_value).collect();
            if cells.iter().all(Value::is_null) {
                continue;
            }

            // Compound foreign-key sub-columns group by the field in front
            // of the header separator; everything else is a simple column.
            let mut simple_fields: Vec<(&str, &Value)> = Vec::new();
            let mut compound_fk: BTreeMap<&str, BTreeMap<&str, &Value>> = BTreeMap::new();
            for (header, value) in headers.iter().zip(&cells) {
                match header.split_once(HEADER_SEPARATOR) {
                    Some((fk_field, subfield)) => {
                        compound_fk
                            .entry(fk_field)
                            .or_default()
                            .insert(subfield, value);
                    }
                    None => simple_fields.push((header.as_str(), value)),
                }
            }

            let mut data: BTreeMap<String, Value> = BTreeMap::new();
            let mut parent: Option<u64> = None;

            for (field_name, value) in simple_fields {
                match field_map.get(field_name) {
                    Some(field) => {
                        data.insert(
                            field_name.to_string(),
                            resolver::clean_field_value(
                                store,
                                &self.module,
                                entity,
                                field,
                                value,
                                choice_maps,
                            )?,
                        );
                    }
                    None if entity.is_tree() && field_name == "parent" => {
                        if !value.is_null() {
                            parent = Some(self.resolve_parent(store, entity, value)?);
                        }
                    }
                    None => {
                        return Err(Error::Workbook(format!(
                            "column '{field_name}' does not match a field of '{}'",
                            entity.name
                        )));
                    }
                }
            }

            for (fk_field, subfield_map) in compound_fk {
                let Some(field) = field_map.get(fk_field) else {
                    continue;
                };
                let target_name = field.relation_target().ok_or_else(|| {
                    Error::Configuration(format!("field '{fk_field}' is not a foreign key"))
                })?;
                let target = self.module.get_entity(target_name).ok_or_else(|| {
                    Error::Configuration(format!("unknown entity '{target_name}'"))
                })?;

                let key_values: Vec<Value> = resolver::natural_key_fields(target)?
                    .iter()
                    .map(|k| {
                        subfield_map
                            .get(k.as_str())
                            .map(|v| (*v).clone())
                            .unwrap_or(Value::Null)
                    })
                    .collect();

                if key_values.iter().all(Value::is_null) {
                    if !field.nullable {
                        return Err(Error::Validation(ValidationError::NullViolation {
                            field: fk_field.to_string(),
                        }));
                    }
                    data.insert(fk_field.to_string(), Value::Null);
                    continue;
                }
                if key_values.iter().any(Value::is_null) {
                    return Err(Error::Validation(ValidationError::PartialCompoundKey {
                        field: fk_field.to_string(),
                        values: key_values,
                    }));
                }

                data.insert(
                    fk_field.to_string(),
                    resolver::resolve_foreign_key(
                        store,
                        &self.module,
                        field,
                        &key_values,
                        choice_maps,
                    )?,
                );
            }

            // Rows with any missing natural-key component are incomplete
            // template rows, not errors.
            let lookup: BTreeMap<String, Value> = key_fields
                .iter()
                .map(|k| (k.clone(), data.get(k).cloned().unwrap_or(Value::Null)))
                .collect();
            if lookup.values().any(|v| v.is_null()) {
                continue;
            }

            if !entity.is_tree() {
                let (_, created) = store.create_or_update(&entity.name, &lookup, &data)?;
                if created {
                    created_count += 1;
                } else {
                    updated_count += 1;
                }
            } else {
                let key_values: Vec<Value> =
                    key_fields.iter().map(|k| lookup[k].clone()).collect();
                if store.get_by_natural_key(&entity.name, &key_values)?.is_some() {
                    // Existing tree nodes are left as they are.
                    updated_count += 1;
                } else {
                    match parent {
                        Some(parent_id) => store.add_child(&entity.name, parent_id, data)?,
                        None => store.add_root(&entity.name, data)?,
                    };
                    created_count += 1;
                }
            }
        }

        Ok((created_count, updated_count))
    }

    /// A parent cell names the parent node by this type's own natural key.
    fn resolve_parent(
        &self,
        store: &dyn EntityStore,
        entity: &EntitySchema,
        raw: &Value,
    ) -> Result<u64> {
        let key_fields = resolver::natural_key_fields(entity)?;
        if key_fields.len() != 1 {
            return Err(Error::NotSupported(format!(
                "parent resolution for '{}' requires a single-field natural key",
                entity.name
            )));
        }
        let key_field = entity.get_field(&key_fields[0]).ok_or_else(|| {
            Error::Configuration(format!(
                "natural key of '{}' names unknown field '{}'",
                entity.name, key_fields[0]
            ))
        })?;
        let value = resolver::coerce_value(raw, &key_field.ty, &key_field.name)?;
        store
            .get_by_natural_key(&entity.name, &[value.clone()])?
            .ok_or_else(|| {
                Error::Validation(ValidationError::NotFound {
                    entity: entity.name.clone(),
                    key: vec![value],
                })
            })
    }
}

/// The live field map for a type: declared fields minus tree bookkeeping.
fn entity_fields(entity: &EntitySchema) -> BTreeMap<&str, &FieldSchema> {
    entity
        .fields
        .iter()
        .filter(|f| !(entity.is_tree() && TREE_AUTO_FIELDS.contains(&f.name.as_str())))
        .map(|f| (f.name.as_str(), f))
        .collect()
}

/// Raw cell to value. Field-level typing is applied later by the resolver;
/// here whole floats become integers and blank text becomes null, matching
/// how spreadsheet applications store user input.
fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::Text(s.clone()),
        Data::Int(n) => Value::Integer(*n),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::Integer(*f as i64),
        Data::Float(f) => Decimal::from_f64_retain(*f)
            .map(Value::Decimal)
            .unwrap_or(Value::Null),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| Value::Date(d.date()))
            .unwrap_or(Value::Null),
        Data::DateTimeIso(s) => Value::Text(s.clone()),
        Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(_) => Value::Null,
    }
}
