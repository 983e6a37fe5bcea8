use std::collections::HashSet;

use log::debug;
use rust_xlsxwriter::utility::column_number_to_name;
use rust_xlsxwriter::{
    DataValidation, Format, Formula, Table, TableColumn, TableStyle, Workbook, Worksheet,
};

use crate::error::{Error, Result};
use crate::schema::Value;
use crate::schema::metadata::{self, EntityDescriptor, FieldDescriptor, FieldRole};
use crate::schema::{ModuleRegistry, ModuleSchema};

/// Workbook-level defined name recording which module a template was
/// generated for. Checked again on import.
pub const MODULE_TAG: &str = "_module";

/// Headers sit on Excel row 3; data entry starts on row 4. Column A is a
/// narrow gutter, so field columns start at B.
const HEADER_ROW: u32 = 2;
const FIRST_DATA_ROW: u32 = 3;
const LAST_DATA_ROW: u32 = 1_048_575;
const START_COL: u16 = 1;

/// Builds an import template workbook for one module: a tabled worksheet per
/// entity type, named ranges over every foreign-key target column, and
/// dropdown validation for foreign-key, boolean, choice, and tree-parent
/// columns.
pub struct TemplateBuilder {
    module: ModuleSchema,
    descriptors: Vec<EntityDescriptor>,
    workbook: Workbook,
    /// (entity, field) pairs used as a dropdown source somewhere.
    fk_targets: HashSet<(String, String)>,
    choice_fields: Vec<(String, FieldDescriptor)>,
}

impl TemplateBuilder {
    pub fn new(registry: &ModuleRegistry, module_name: &str) -> Result<Self> {
        let module = registry.get(module_name)?.clone();
        let descriptors = metadata::read_module(&module)?;
        Ok(Self {
            module,
            descriptors,
            workbook: Workbook::new(),
            fk_targets: HashSet::new(),
            choice_fields: Vec::new(),
        })
    }

    /// Run every build step in order. Named ranges are created before any
    /// validation rule that refers to them, because the rules are wired by
    /// name. On error the partially-built workbook must be discarded, never
    /// saved.
    pub fn build(mut self) -> Result<Workbook> {
        self.tag_module()?;

        for descriptor in self.descriptors.clone() {
            self.create_entity_worksheet(&descriptor)?;
        }

        self.resolve_foreign_keys()?;
        self.add_named_ranges_for_foreign_keys()?;
        self.add_foreign_key_validations()?;
        self.add_boolean_validations()?;

        if !self.choice_fields.is_empty() {
            self.add_choices_sheet()?;
            self.add_choice_validations()?;
        }

        self.add_parent_validations()?;

        debug!(
            "built template for module '{}' with {} entity sheets",
            self.module.name,
            self.descriptors.len()
        );
        Ok(self.workbook)
    }

    fn descriptor(&self, entity: &str) -> Result<&EntityDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.name == entity)
            .ok_or_else(|| Error::Configuration(format!("no descriptor for entity '{entity}'")))
    }

    /// The column a foreign-key dropdown draws from: the resolved key
    /// component for compound columns, otherwise the target's first
    /// exportable field.
    fn target_column(&self, target: &str, resolved_field: Option<&String>) -> Result<String> {
        match resolved_field {
            Some(field) => Ok(field.clone()),
            None => Ok(self.descriptor(target)?.first_field()?.field.clone()),
        }
    }

    fn tag_module(&mut self) -> Result<()> {
        self.workbook
            .define_name(MODULE_TAG, &format!("=\"{}\"", self.module.name))?;
        Ok(())
    }

    fn create_entity_worksheet(&mut self, descriptor: &EntityDescriptor) -> Result<()> {
        let worksheet = self.workbook.add_worksheet();
        worksheet.set_name(&descriptor.name)?;
        worksheet.set_column_width(0, 2)?;

        let title_format = Format::new().set_bold();
        worksheet.write_string_with_format(0, 0, &descriptor.name, &title_format)?;

        let header_format = Format::new().set_bold().set_text_wrap();
        let columns: Vec<TableColumn> = descriptor
            .fields
            .iter()
            .map(|field| {
                TableColumn::new()
                    .set_header(&field.header)
                    .set_header_format(header_format.clone())
            })
            .collect();

        for (index, field) in descriptor.fields.iter().enumerate() {
            let first_line = field.header.split('\n').next().unwrap_or(&field.header);
            let width = (first_line.len() + 2).max(12) as f64;
            worksheet.set_column_width(START_COL + index as u16, width)?;
        }

        if descriptor.fields.is_empty() {
            return Err(Error::Configuration(format!(
                "entity '{}' has no exportable fields",
                descriptor.name
            )));
        }

        // Header row plus one blank data row; rows typed below inherit the
        // table when the file is edited in a spreadsheet application.
        let last_col = START_COL + descriptor.fields.len() as u16 - 1;
        let table = Table::new()
            .set_name(&descriptor.name)
            .set_style(TableStyle::Light1)
            .set_columns(&columns);
        worksheet.add_table(HEADER_ROW, START_COL, HEADER_ROW + 1, last_col, &table)?;

        Ok(())
    }

    /// Record which (entity, field) columns back a dropdown somewhere, and
    /// collect the choice fields for the `Choices` sheet.
    fn resolve_foreign_keys(&mut self) -> Result<()> {
        for descriptor in self.descriptors.clone() {
            for field in &descriptor.fields {
                match &field.role {
                    FieldRole::ForeignKey {
                        target,
                        resolved_field,
                    } => {
                        let column = self.target_column(target, resolved_field.as_ref())?;
                        self.fk_targets.insert((target.clone(), column));
                    }
                    FieldRole::Choice { .. } => {
                        self.choice_fields
                            .push((descriptor.name.clone(), field.clone()));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn add_named_ranges_for_foreign_keys(&mut self) -> Result<()> {
        for descriptor in &self.descriptors {
            for field in &descriptor.fields {
                if self
                    .fk_targets
                    .contains(&(descriptor.name.clone(), field.field.clone()))
                {
                    let name = format!("lst{}_{}", descriptor.name, field.field);
                    // Structured table reference, so the range follows the
                    // table as rows are added.
                    let reference =
                        format!("='{0}'!{0}[{1}]", descriptor.name, field.field);
                    self.workbook.define_name(&name, &reference)?;
                }
            }
        }
        Ok(())
    }

    fn add_foreign_key_validations(&mut self) -> Result<()> {
        for descriptor in self.descriptors.clone() {
            for (index, field) in descriptor.fields.iter().enumerate() {
                let FieldRole::ForeignKey {
                    target,
                    resolved_field,
                } = &field.role
                else {
                    continue;
                };
                let column = self.target_column(target, resolved_field.as_ref())?;
                let validation = DataValidation::new()
                    .allow_list_formula(Formula::new(format!("=lst{target}_{column}")))
                    .ignore_blank(field.nullable);
                self.add_column_validation(&descriptor.name, index, &validation)?;
            }
        }
        Ok(())
    }

    fn add_boolean_validations(&mut self) -> Result<()> {
        for descriptor in self.descriptors.clone() {
            for (index, field) in descriptor.fields.iter().enumerate() {
                if !matches!(field.role, FieldRole::Boolean) {
                    continue;
                }
                let validation = DataValidation::new()
                    .allow_list_strings(&["TRUE", "FALSE"])?
                    .ignore_blank(field.nullable);
                self.add_column_validation(&descriptor.name, index, &validation)?;
            }
        }
        Ok(())
    }

    fn add_choices_sheet(&mut self) -> Result<()> {
        let worksheet = self.workbook.add_worksheet();
        worksheet.set_name("Choices")?;
        worksheet.set_column_width(0, 2)?;
        let title_format = Format::new().set_bold();
        worksheet.write_string_with_format(0, 0, "Choices", &title_format)?;

        let mut current_col: u16 = START_COL;
        let mut ranges = Vec::new();

        for (entity, field) in &self.choice_fields {
            let FieldRole::Choice { choices } = &field.role else {
                continue;
            };
            let key_col = current_col;
            let label_col = current_col + 1;

            let mut row = FIRST_DATA_ROW;
            let mut label_width: usize = format!("{}_label", field.field).len();
            let mut key_width: usize = format!("{}_key", field.field).len();
            for (key, label) in choices {
                write_value(worksheet, row, key_col, key)?;
                worksheet.write_string(row, label_col, label)?;
                key_width = key_width.max(key.to_string().len());
                label_width = label_width.max(label.len());
                row += 1;
            }
            let end_row = row - 1;

            let table_name = format!("{entity}_{}_choices", field.field);
            let table = Table::new()
                .set_name(&table_name)
                .set_style(TableStyle::Light1)
                .set_columns(&[
                    TableColumn::new().set_header(format!("{}_key", field.field)),
                    TableColumn::new().set_header(format!("{}_label", field.field)),
                ]);
            worksheet.add_table(HEADER_ROW, key_col, end_row, label_col, &table)?;

            worksheet.set_column_width(key_col, (key_width + 2) as f64)?;
            worksheet.set_column_width(label_col, (label_width + 2) as f64)?;

            let label_letter = column_number_to_name(label_col);
            ranges.push((
                format!("lst{table_name}"),
                format!(
                    "=Choices!${label_letter}${}:${label_letter}${}",
                    FIRST_DATA_ROW + 1,
                    end_row + 1
                ),
            ));

            current_col += 3;
        }

        for (name, reference) in ranges {
            self.workbook.define_name(&name, &reference)?;
        }
        Ok(())
    }

    fn add_choice_validations(&mut self) -> Result<()> {
        for descriptor in self.descriptors.clone() {
            for (index, field) in descriptor.fields.iter().enumerate() {
                if !matches!(field.role, FieldRole::Choice { .. }) {
                    continue;
                }
                let validation = DataValidation::new()
                    .allow_list_formula(Formula::new(format!(
                        "=lst{}_{}_choices",
                        descriptor.name, field.field
                    )))
                    .ignore_blank(field.nullable);
                self.add_column_validation(&descriptor.name, index, &validation)?;
            }
        }
        Ok(())
    }

    /// A tree type's parent dropdown lists instances of the same type, keyed
    /// by its first exportable field. The named range may already exist if
    /// that field is a foreign-key target elsewhere.
    fn add_parent_validations(&mut self) -> Result<()> {
        for descriptor in self.descriptors.clone() {
            if !descriptor.hierarchical {
                continue;
            }
            let key_field = descriptor.first_field()?.field.clone();
            let range_name = format!("lst{}_{}", descriptor.name, key_field);

            if !self
                .fk_targets
                .contains(&(descriptor.name.clone(), key_field.clone()))
            {
                let reference = format!("='{0}'!{0}[{1}]", descriptor.name, key_field);
                self.workbook.define_name(&range_name, &reference)?;
                self.fk_targets
                    .insert((descriptor.name.clone(), key_field.clone()));
            }

            for (index, field) in descriptor.fields.iter().enumerate() {
                if !matches!(field.role, FieldRole::TreeParent) {
                    continue;
                }
                let validation = DataValidation::new()
                    .allow_list_formula(Formula::new(format!("={range_name}")))
                    .ignore_blank(true);
                self.add_column_validation(&descriptor.name, index, &validation)?;
            }
        }
        Ok(())
    }

    /// Attach a validation rule to the whole unbounded data column of one
    /// field, not just the rows present at generation time.
    fn add_column_validation(
        &mut self,
        entity: &str,
        field_index: usize,
        validation: &DataValidation,
    ) -> Result<()> {
        let col = START_COL + field_index as u16;
        let worksheet = self.workbook.worksheet_from_name(entity)?;
        worksheet.add_data_validation(FIRST_DATA_ROW, col, LAST_DATA_ROW, col, validation)?;
        Ok(())
    }
}

fn write_value(worksheet: &mut Worksheet, row: u32, col: u16, value: &Value) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Integer(n) => {
            worksheet.write_number(row, col, *n as f64)?;
        }
        Value::Bool(b) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        other => {
            worksheet.write_string(row, col, other.to_string())?;
        }
    }
    Ok(())
}
