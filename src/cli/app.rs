use clap::{Parser, Subcommand};

use super::commands::import::ImportArgs;
use super::commands::template::TemplateArgs;

#[derive(Parser)]
#[command(name = "sheetbridge")]
#[command(about = "Generate and import Excel workbook templates for module reference data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate an import template mirroring a module's entity schema
    Template(TemplateArgs),
    /// Import a populated template workbook into a module's store
    Import(ImportArgs),
}
