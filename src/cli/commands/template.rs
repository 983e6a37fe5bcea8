use clap::Args;

#[derive(Args)]
pub struct TemplateArgs {
    /// Create an import template for this module
    pub module: String,
}
