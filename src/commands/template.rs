use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use crate::cli::commands::template::TemplateArgs;
use crate::excel::TemplateBuilder;
use crate::schema::ModuleRegistry;

/// Create an import template for every entity type of the given module,
/// overwriting any previous template file.
pub fn run(args: &TemplateArgs) -> Result<()> {
    let registry = ModuleRegistry::builtin();
    registry.get(&args.module)?;

    let template_dir = Path::new(&args.module).join("templates");
    fs::create_dir_all(&template_dir)
        .with_context(|| format!("failed to create {}", template_dir.display()))?;
    // Completed templates are dropped here for the import command to pick up.
    let import_dir = Path::new(&args.module).join("import_files");
    fs::create_dir_all(&import_dir)
        .with_context(|| format!("failed to create {}", import_dir.display()))?;

    let output_file = template_dir.join(format!("{}_import_file.xlsx", args.module));
    if output_file.exists() {
        fs::remove_file(&output_file)
            .with_context(|| format!("failed to remove {}", output_file.display()))?;
    }

    let builder = TemplateBuilder::new(&registry, &args.module)?;
    let mut workbook = builder.build()?;
    workbook
        .save(&output_file)
        .with_context(|| format!("failed to save {}", output_file.display()))?;

    println!(
        "{}",
        format!("✔ Import template saved to {}", output_file.display()).green()
    );
    Ok(())
}
