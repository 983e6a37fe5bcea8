use crate::error::{Error, Result};
use crate::schema::ModuleSchema;
use crate::schema::fiscal;

/// All application modules known to this binary, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleSchema>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry the CLI ships with.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(fiscal::module());
        registry
    }

    pub fn register(&mut self, module: ModuleSchema) {
        self.modules.push(module);
    }

    pub fn get(&self, name: &str) -> Result<&ModuleSchema> {
        self.modules
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::Configuration(format!("module '{name}' not found")))
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }
}
