use clap::Args;

#[derive(Args)]
pub struct ImportArgs {
    /// Import into this module
    pub module: String,

    /// Optional: only import data for a specific entity type within the module
    #[arg(long)]
    pub entity: Option<String>,
}
