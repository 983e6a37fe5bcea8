use std::path::Path;

use anyhow::{Result, bail};
use colored::Colorize;

use crate::cli::commands::import::ImportArgs;
use crate::excel::WorkbookImporter;
use crate::schema::ModuleRegistry;
use crate::store::MemoryStore;

/// Import a populated workbook from the module's import directory into its
/// store file. The command exits zero once the import has executed, even
/// when every entity type failed; per-type outcomes are printed instead.
pub fn run(args: &ImportArgs) -> Result<()> {
    let registry = ModuleRegistry::builtin();
    let module = registry.get(&args.module)?.clone();

    let full_path = Path::new(&args.module)
        .join("import_files")
        .join(format!("{}_import_file.xlsx", args.module));
    if !full_path.is_file() {
        bail!("file does not exist at {}", full_path.display());
    }

    let store_path = Path::new(&args.module).join("store.json");
    let mut store = MemoryStore::load(&store_path, module.clone())?;

    let importer =
        WorkbookImporter::new(&full_path, module).with_entity_filter(args.entity.clone());

    match importer.import(&mut store) {
        Ok(result) => {
            store.save(&store_path)?;
            if !result.successes.is_empty() {
                println!("{}", "✔ Import Successes:".green());
                for line in &result.successes {
                    println!("{}", format!("  - {line}").green());
                }
            }
            if !result.failures.is_empty() {
                if result.successes.is_empty() {
                    println!("{}", "⚠ Import Failed:".red());
                    for line in &result.failures {
                        println!("{}", format!("  - {line}").red());
                    }
                } else {
                    println!("{}", "⚠ Import Failures:".yellow());
                    for line in &result.failures {
                        println!("{}", format!("  - {line}").yellow());
                    }
                }
            }
        }
        Err(err) => {
            println!("{}", "⚠ Import Failed:".red());
            println!("{}", format!("  - {err}").red());
        }
    }
    Ok(())
}
