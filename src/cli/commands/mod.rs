pub mod import;
pub mod template;
