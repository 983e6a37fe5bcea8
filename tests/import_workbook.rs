use std::path::Path;

use rust_xlsxwriter::{Table, TableColumn, Workbook};
use tempfile::TempDir;

use sheetbridge::error::{Error, ValidationError};
use sheetbridge::excel::WorkbookImporter;
use sheetbridge::schema::{EntitySchema, FieldSchema, ModuleSchema, Value};
use sheetbridge::store::{EntityStore, MemoryStore};

/// A cell value for the workbook-writing helper below.
enum Cell {
    Blank,
    Text(&'static str),
    Number(f64),
}

use Cell::{Blank, Number, Text};

/// Write one template-shaped sheet: title in A1, a table named after the
/// entity with the header row on Excel row 3, data rows underneath. This is
/// the layout a filled-in template has after a spreadsheet application
/// expanded the table over the typed rows.
fn write_sheet(workbook: &mut Workbook, entity: &str, headers: &[&str], rows: &[Vec<Cell>]) {
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(entity).unwrap();
    worksheet.write_string(0, 0, entity).unwrap();

    let columns: Vec<TableColumn> = headers
        .iter()
        .map(|h| TableColumn::new().set_header(*h))
        .collect();
    let last_row = 2 + rows.len().max(1) as u32;
    let last_col = headers.len() as u16;
    let table = Table::new().set_name(entity).set_columns(&columns);
    worksheet.add_table(2, 1, last_row, last_col, &table).unwrap();

    for (row_index, row) in rows.iter().enumerate() {
        for (col_index, cell) in row.iter().enumerate() {
            let row_num = 3 + row_index as u32;
            let col_num = 1 + col_index as u16;
            match cell {
                Blank => {}
                Text(s) => {
                    worksheet.write_string(row_num, col_num, *s).unwrap();
                }
                Number(n) => {
                    worksheet.write_number(row_num, col_num, *n).unwrap();
                }
            }
        }
    }
}

fn save_workbook(workbook: &mut Workbook, dir: &TempDir, name: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    workbook.save(&path).unwrap();
    path
}

fn tag_module(workbook: &mut Workbook, module: &str) {
    workbook
        .define_name("_module", &format!("=\"{module}\""))
        .unwrap();
}

/// The quarter/period module: a choice-keyed entity and an entity whose
/// foreign key resolves through that choice map.
fn quarters_module() -> ModuleSchema {
    ModuleSchema::new("quarters")
        .entity(
            EntitySchema::flat("FiscalQuarter")
                .field(FieldSchema::integer("quarter").unique().choices(vec![
                    (Value::Integer(1), "Q1".to_string()),
                    (Value::Integer(2), "Q2".to_string()),
                    (Value::Integer(3), "Q3".to_string()),
                    (Value::Integer(4), "Q4".to_string()),
                    (Value::Integer(5), "Special Periods".to_string()),
                ]))
                .natural_key(&["quarter"]),
        )
        .entity(
            EntitySchema::flat("Period")
                .field(FieldSchema::integer("period").unique())
                .field(FieldSchema::foreign_key("quarter", "FiscalQuarter"))
                .natural_key(&["period"]),
        )
}

/// Calendar plus a tree of organisation units keyed into it through a
/// compound foreign key.
fn planning_module() -> ModuleSchema {
    ModuleSchema::new("planning")
        .entity(
            EntitySchema::flat("FiscalYear")
                .field(FieldSchema::date("start_date").unique())
                .field(FieldSchema::date("end_date"))
                .natural_key(&["start_date"]),
        )
        .entity(
            EntitySchema::flat("Period")
                .field(FieldSchema::integer("period").unique())
                .natural_key(&["period"]),
        )
        .entity(
            EntitySchema::flat("YearPeriod")
                .field(FieldSchema::foreign_key("fiscal_year", "FiscalYear"))
                .field(FieldSchema::foreign_key("period", "Period"))
                .field(FieldSchema::boolean("open"))
                .natural_key(&["fiscal_year", "period"])
                .unique_together(&["fiscal_year", "period"]),
        )
        .entity(
            EntitySchema::tree("Organisation")
                .field(FieldSchema::text("code").unique())
                .field(FieldSchema::text("name").unique())
                .field(FieldSchema::foreign_key("active_from", "YearPeriod"))
                .natural_key(&["code"]),
        )
}

fn quarters_workbook(dir: &TempDir) -> std::path::PathBuf {
    let mut workbook = Workbook::new();
    tag_module(&mut workbook, "quarters");
    write_sheet(
        &mut workbook,
        "FiscalQuarter",
        &["quarter"],
        &[
            vec![Text("Q1")],
            vec![Text("Q2")],
            vec![Text("Q3")],
            vec![Text("Q4")],
            vec![Text("Special Periods")],
        ],
    );
    write_sheet(
        &mut workbook,
        "Period",
        &["period", "quarter"],
        &[vec![Number(1.0), Text("Q1")]],
    );
    save_workbook(&mut workbook, dir, "quarters.xlsx")
}

fn planning_workbook(dir: &TempDir, organisation_rows: &[Vec<Cell>]) -> std::path::PathBuf {
    let mut workbook = Workbook::new();
    tag_module(&mut workbook, "planning");
    write_sheet(
        &mut workbook,
        "FiscalYear",
        &["start_date", "end_date"],
        &[vec![Text("2025-01-01"), Text("2025-12-31")]],
    );
    write_sheet(&mut workbook, "Period", &["period"], &[vec![Number(1.0)]]);
    write_sheet(
        &mut workbook,
        "YearPeriod",
        &["fiscal_year", "period", "open"],
        &[vec![Text("2025-01-01"), Number(1.0), Text("TRUE")]],
    );
    write_sheet(
        &mut workbook,
        "Organisation",
        &[
            "code",
            "name",
            "active_from\nfiscal_year",
            "active_from\nperiod",
            "parent",
        ],
        organisation_rows,
    );
    save_workbook(&mut workbook, dir, "planning.xlsx")
}

fn import(path: &Path, module: ModuleSchema, store: &mut MemoryStore) -> sheetbridge::excel::ImportReport {
    WorkbookImporter::new(path, module).import(store).unwrap()
}

#[test]
fn choice_labels_resolve_through_foreign_keys_end_to_end() {
    let dir = TempDir::new().unwrap();
    let module = quarters_module();
    let path = quarters_workbook(&dir);

    let mut store = MemoryStore::new(module.clone());
    let report = import(&path, module, &mut store);

    assert!(report.failures.is_empty(), "failures: {:?}", report.failures);
    assert_eq!(
        report.successes,
        vec![
            "FiscalQuarter: 5 created, 0 updated".to_string(),
            "Period: 1 created, 0 updated".to_string(),
        ]
    );

    let q1 = store
        .get_by_natural_key("FiscalQuarter", &[Value::Integer(1)])
        .unwrap()
        .expect("Q1 exists");
    let period = store
        .get_by_natural_key("Period", &[Value::Integer(1)])
        .unwrap()
        .expect("period 1 exists");
    let period = store.get("Period", period).unwrap();
    assert_eq!(period.get("quarter"), &Value::Ref(q1));
}

#[test]
fn reimporting_the_same_workbook_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let module = quarters_module();
    let path = quarters_workbook(&dir);

    let mut store = MemoryStore::new(module.clone());
    import(&path, module.clone(), &mut store);
    let before: Vec<_> = store.all("FiscalQuarter").into_iter().cloned().collect();

    let report = import(&path, module, &mut store);
    assert!(report.failures.is_empty());
    assert_eq!(
        report.successes,
        vec![
            "FiscalQuarter: 0 created, 5 updated".to_string(),
            "Period: 0 created, 1 updated".to_string(),
        ]
    );
    let after: Vec<_> = store.all("FiscalQuarter").into_iter().cloned().collect();
    assert_eq!(before, after);
}

#[test]
fn module_tag_mismatch_fails_before_any_row() {
    let dir = TempDir::new().unwrap();
    let path = quarters_workbook(&dir);

    // Same sheets, different module.
    let mut module = quarters_module();
    module.name = "billing".to_string();
    let mut store = MemoryStore::new(module.clone());
    let err = WorkbookImporter::new(&path, module)
        .import(&mut store)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::ModuleMismatch { .. })
    ));
    assert!(store.all("FiscalQuarter").is_empty());
}

#[test]
fn invalid_choice_label_aborts_the_entity_type() {
    let dir = TempDir::new().unwrap();
    let module = quarters_module();

    let mut workbook = Workbook::new();
    tag_module(&mut workbook, "quarters");
    write_sheet(
        &mut workbook,
        "FiscalQuarter",
        &["quarter"],
        &[vec![Text("Q1")], vec![Text("Q9")]],
    );
    let path = save_workbook(&mut workbook, &dir, "bad_choice.xlsx");

    let mut store = MemoryStore::new(module.clone());
    let report = import(&path, module, &mut store);

    assert!(report.successes.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("invalid choice 'Q9'"));
    // The whole type rolled back, including the valid first row.
    assert!(store.all("FiscalQuarter").is_empty());
}

#[test]
fn rows_with_empty_natural_keys_are_silently_skipped() {
    let dir = TempDir::new().unwrap();
    let module = quarters_module();

    let mut workbook = Workbook::new();
    tag_module(&mut workbook, "quarters");
    write_sheet(
        &mut workbook,
        "Period",
        &["period", "quarter"],
        &[
            // All-empty row: ignored outright.
            vec![Blank, Blank],
            // Key column empty, another cell filled: skipped, not an error.
            vec![Blank, Text("Q1")],
        ],
    );
    let path = save_workbook(&mut workbook, &dir, "empty_keys.xlsx");

    let mut store = MemoryStore::new(module.clone());
    seed_quarters(&mut store);
    let report = import(&path, module, &mut store);

    assert!(report.failures.is_empty(), "failures: {:?}", report.failures);
    assert_eq!(report.successes, vec!["Period: 0 created, 0 updated".to_string()]);
    assert!(store.all("Period").is_empty());
}

fn seed_quarters(store: &mut MemoryStore) {
    for n in 1..=5 {
        let mut lookup = std::collections::BTreeMap::new();
        lookup.insert("quarter".to_string(), Value::Integer(n));
        store
            .create_or_update("FiscalQuarter", &lookup, &std::collections::BTreeMap::new())
            .unwrap();
    }
}

#[test]
fn compound_keys_resolve_and_partial_ones_roll_back_the_type() {
    let dir = TempDir::new().unwrap();
    let module = planning_module();

    // First a clean import to prove the compound path works.
    let path = planning_workbook(
        &dir,
        &[vec![
            Text("ROOT"),
            Text("Head Office"),
            Text("2025-01-01"),
            Number(1.0),
            Blank,
        ]],
    );
    let mut store = MemoryStore::new(module.clone());
    let report = import(&path, module.clone(), &mut store);
    assert!(report.failures.is_empty(), "failures: {:?}", report.failures);

    let org_id = store
        .get_by_natural_key("Organisation", &[Value::from("ROOT")])
        .unwrap()
        .expect("organisation imported");
    let org = store.get("Organisation", org_id).unwrap();
    let yp_id = org.get("active_from").as_ref_id().expect("resolved reference");
    let year_period = store.get("YearPeriod", yp_id).unwrap();
    assert_eq!(year_period.get("open"), &Value::Bool(true));

    // Now a workbook whose second organisation row has half a compound key.
    let path = planning_workbook(
        &dir,
        &[
            vec![
                Text("OK"),
                Text("Complete Row"),
                Text("2025-01-01"),
                Number(1.0),
                Blank,
            ],
            vec![
                Text("BAD"),
                Text("Partial Row"),
                Text("2025-01-01"),
                Blank,
                Blank,
            ],
        ],
    );
    let mut store = MemoryStore::new(module.clone());
    let report = import(&path, module, &mut store);

    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("partial values for compound foreign key 'active_from'"));
    // No partial writes survive for the failed type...
    assert!(store.all("Organisation").is_empty());
    // ...while earlier types committed their own transactions.
    assert_eq!(store.all("YearPeriod").len(), 1);
}

#[test]
fn tree_rows_become_roots_and_children() {
    let dir = TempDir::new().unwrap();
    let module = planning_module();
    let path = planning_workbook(
        &dir,
        &[
            vec![
                Text("ROOT"),
                Text("Head Office"),
                Text("2025-01-01"),
                Number(1.0),
                Blank,
            ],
            vec![
                Text("CHILD"),
                Text("Branch"),
                Text("2025-01-01"),
                Number(1.0),
                Text("ROOT"),
            ],
        ],
    );

    let mut store = MemoryStore::new(module.clone());
    let report = import(&path, module, &mut store);
    assert!(report.failures.is_empty(), "failures: {:?}", report.failures);

    let root = store
        .get_by_natural_key("Organisation", &[Value::from("ROOT")])
        .unwrap()
        .unwrap();
    let child = store
        .get_by_natural_key("Organisation", &[Value::from("CHILD")])
        .unwrap()
        .unwrap();

    assert_eq!(store.get("Organisation", root).unwrap().get("depth"), &Value::Integer(1));
    assert_eq!(store.descendants("Organisation", root).unwrap(), vec![child]);
    assert_eq!(store.children("Organisation", root).unwrap(), vec![child]);
}

#[test]
fn existing_tree_nodes_are_not_recreated() {
    let dir = TempDir::new().unwrap();
    let module = planning_module();
    let rows = [vec![
        Text("ROOT"),
        Text("Head Office"),
        Text("2025-01-01"),
        Number(1.0),
        Blank,
    ]];
    let path = planning_workbook(&dir, &rows);

    let mut store = MemoryStore::new(module.clone());
    import(&path, module.clone(), &mut store);
    let report = import(&path, module, &mut store);

    assert!(report.failures.is_empty());
    assert!(
        report
            .successes
            .contains(&"Organisation: 0 created, 1 updated".to_string())
    );
    assert_eq!(store.all("Organisation").len(), 1);
}

#[test]
fn sheets_without_a_table_or_missing_entirely_are_skipped() {
    let dir = TempDir::new().unwrap();
    let module = quarters_module();

    let mut workbook = Workbook::new();
    tag_module(&mut workbook, "quarters");
    // Only the Period sheet, and a tableless extra sheet.
    write_sheet(&mut workbook, "Period", &["period", "quarter"], &[]);
    let loose = workbook.add_worksheet();
    loose.set_name("FiscalQuarter").unwrap();
    loose.write_string(0, 0, "notes only").unwrap();
    let path = save_workbook(&mut workbook, &dir, "partial.xlsx");

    let mut store = MemoryStore::new(module.clone());
    let report = import(&path, module, &mut store);

    assert!(report.failures.is_empty(), "failures: {:?}", report.failures);
    assert_eq!(report.successes, vec!["Period: 0 created, 0 updated".to_string()]);
}

#[test]
fn entity_filter_limits_the_run_to_one_type() {
    let dir = TempDir::new().unwrap();
    let module = quarters_module();
    let path = quarters_workbook(&dir);

    let mut store = MemoryStore::new(module.clone());
    let report = WorkbookImporter::new(&path, module)
        .with_entity_filter(Some("FiscalQuarter".to_string()))
        .import(&mut store)
        .unwrap();

    assert_eq!(
        report.successes,
        vec!["FiscalQuarter: 5 created, 0 updated".to_string()]
    );
    assert!(store.all("Period").is_empty());
}
