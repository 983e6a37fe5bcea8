//! The built-in `fiscal` module: financial reference data organised around
//! fiscal calendars, account/organisation/project trees, and the financial
//! figures posted against them.

use crate::schema::{EntitySchema, FieldSchema, ModuleSchema, Value};

fn quarter_choices() -> Vec<(Value, String)> {
    vec![
        (Value::Integer(1), "Q1".to_string()),
        (Value::Integer(2), "Q2".to_string()),
        (Value::Integer(3), "Q3".to_string()),
        (Value::Integer(4), "Q4".to_string()),
        (Value::Integer(5), "Special Periods".to_string()),
    ]
}

fn period_choices() -> Vec<(Value, String)> {
    (1..=16)
        .map(|p| (Value::Integer(p), format!("Period {p:02}")))
        .collect()
}

fn month_choices() -> Vec<(Value, String)> {
    [
        "January",
        "February",
        "March",
        "April",
        "May",
        "June",
        "July",
        "August",
        "September",
        "October",
        "November",
        "December",
    ]
    .iter()
    .enumerate()
    .map(|(i, name)| (Value::Integer(i as i64 + 1), name.to_string()))
    .collect()
}

fn operator_choices() -> Vec<(Value, String)> {
    vec![
        (Value::Integer(1), "DR".to_string()),
        (Value::Integer(-1), "CR".to_string()),
    ]
}

pub fn module() -> ModuleSchema {
    ModuleSchema::new("fiscal")
        .entity(
            EntitySchema::flat("Measure")
                .field(FieldSchema::text("name").unique())
                .natural_key(&["name"]),
        )
        .entity(
            EntitySchema::flat("FiscalQuarter")
                .field(
                    FieldSchema::integer("quarter")
                        .unique()
                        .choices(quarter_choices()),
                )
                .natural_key(&["quarter"]),
        )
        .entity(
            EntitySchema::flat("Period")
                .field(
                    FieldSchema::integer("period")
                        .unique()
                        .choices(period_choices()),
                )
                .field(FieldSchema::foreign_key("quarter", "FiscalQuarter"))
                .natural_key(&["period"]),
        )
        .entity(
            EntitySchema::flat("FiscalYear")
                .field(FieldSchema::date("start_date").unique())
                .field(FieldSchema::date("end_date"))
                .natural_key(&["start_date"]),
        )
        .entity(
            EntitySchema::flat("FiscalYearPeriod")
                .field(FieldSchema::foreign_key("fiscal_year", "FiscalYear"))
                .field(FieldSchema::foreign_key("period", "Period"))
                .field(FieldSchema::boolean("open"))
                .field(FieldSchema::foreign_key("default_budget", "Measure").nullable())
                .natural_key(&["fiscal_year", "period"])
                .unique_together(&["fiscal_year", "period"]),
        )
        .entity(
            EntitySchema::flat("PeriodMonth")
                .field(FieldSchema::foreign_key("period", "Period").unique())
                .field(FieldSchema::integer("month").choices(month_choices()))
                .natural_key(&["period"])
                .unique_together(&["period", "month"]),
        )
        .entity(
            EntitySchema::tree("AccountType")
                .field(FieldSchema::integer("code").unique())
                .field(FieldSchema::text("name").unique())
                .field(FieldSchema::integer("operator").choices(operator_choices()))
                .natural_key(&["code"]),
        )
        .entity(
            EntitySchema::tree("Organisation")
                .field(FieldSchema::text("code").unique())
                .field(FieldSchema::text("name").unique())
                .field(FieldSchema::foreign_key("active_from", "FiscalYearPeriod"))
                .field(FieldSchema::foreign_key("active_to", "FiscalYearPeriod").nullable())
                .natural_key(&["code"]),
        )
        .entity(
            EntitySchema::tree("Account")
                .field(FieldSchema::integer("code").unique())
                .field(FieldSchema::text("name").unique())
                .field(FieldSchema::foreign_key("account_type", "AccountType"))
                .field(FieldSchema::boolean("posting"))
                .field(FieldSchema::foreign_key("active_from", "FiscalYearPeriod"))
                .field(FieldSchema::foreign_key("active_to", "FiscalYearPeriod").nullable())
                .natural_key(&["code"]),
        )
        .entity(
            EntitySchema::tree("Project")
                .field(FieldSchema::integer("code").unique())
                .field(FieldSchema::text("name").unique())
                .field(FieldSchema::foreign_key("active_from", "FiscalYearPeriod"))
                .field(FieldSchema::foreign_key("active_to", "FiscalYearPeriod").nullable())
                .natural_key(&["code"]),
        )
        .entity(
            EntitySchema::flat("FinancialData")
                .field(FieldSchema::foreign_key("fiscal_year_period", "FiscalYearPeriod"))
                .field(FieldSchema::foreign_key("organisation", "Organisation"))
                .field(FieldSchema::foreign_key("account", "Account"))
                .field(FieldSchema::foreign_key("project", "Project"))
                .field(FieldSchema::decimal("actual"))
                .field(FieldSchema::decimal("working_forecast").nullable())
                .field(FieldSchema::decimal("original_budget").nullable())
                .field(FieldSchema::decimal("revised_budget").nullable())
                .natural_key(&["fiscal_year_period", "organisation", "account", "project"])
                .unique_together(&[
                    "fiscal_year_period",
                    "organisation",
                    "account",
                    "project",
                ]),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::metadata;

    #[test]
    fn module_metadata_reads_cleanly() {
        let module = module();
        let descriptors = metadata::read_module(&module).unwrap();
        assert_eq!(descriptors.len(), 11);
        let org = descriptors.iter().find(|d| d.name == "Organisation").unwrap();
        assert!(org.hierarchical);
        // active_from expands over FiscalYearPeriod's unique constraint.
        assert!(org.fields.iter().any(|f| f.field == "active_from fiscal_year"));
        assert!(org.fields.iter().any(|f| f.field == "active_from period"));
    }
}
