pub mod discovery;
pub mod layers;
pub mod locals;
pub mod options;
pub mod output;
pub mod parser;
pub mod processor;
pub mod project;
pub mod resolver;

// Re-export main types
pub use options::GenerateOptions;
pub use output::AtlantisConfig;
pub use parser::{HclModuleLoader, ModuleLoader};
pub use processor::{GenerateError, generate, run};
pub use project::Project;
