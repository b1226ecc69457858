//! Load a Terraform module directory and extract the constructs we care about.

use std::collections::HashMap;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use hcl::eval::{Context, Evaluate};
use hcl::{Block, Body, Expression, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to read module directory {path}: {source}")]
    ReadDir {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("module path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
}

/// A call to a child module (`module "name" { source = ... }`)
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleCall {
    pub name: String,
    /// Literal `source` address. `None` when missing or not a plain string.
    pub source_addr: Option<String>,
    /// Raw text of a quoted `source` template that could not be evaluated
    pub unresolved_source: Option<String>,
}

/// Marker for a `terraform { backend "<type>" {} }` block
#[derive(Debug, Clone, PartialEq)]
pub struct Backend {
    pub kind: String,
}

/// A parsed Terraform module directory
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Directory the module was loaded from
    pub source_dir: Utf8PathBuf,
    /// Unevaluated local values, keyed by name
    pub locals: HashMap<String, Expression>,
    pub module_calls: Vec<ModuleCall>,
    pub backend: Option<Backend>,
}

/// Non-fatal problem found while loading a module
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub file: Utf8PathBuf,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file, self.message)
    }
}

/// A module plus whatever diagnostics were collected while loading it
#[derive(Debug, Clone, Default)]
pub struct LoadedModule {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

impl LoadedModule {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Turns a directory into a [`Module`].
///
/// Implementations must only fail when nothing usable can be produced; anything
/// recoverable belongs in [`LoadedModule::diagnostics`].
pub trait ModuleLoader: Send + Sync {
    fn load_dir(&self, dir: &Utf8Path) -> Result<LoadedModule, ParseError>;
}

/// Loads `*.tf` files with `hcl-rs`
#[derive(Debug, Default, Clone, Copy)]
pub struct HclModuleLoader;

impl ModuleLoader for HclModuleLoader {
    fn load_dir(&self, dir: &Utf8Path) -> Result<LoadedModule, ParseError> {
        let read_err = |source| ParseError::ReadDir {
            path: dir.to_owned(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            let path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|p| ParseError::NonUtf8Path(p.display().to_string()))?;
            if path.extension() == Some("tf") && path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let mut loaded = LoadedModule {
            module: Module {
                source_dir: dir.to_owned(),
                ..Default::default()
            },
            diagnostics: Vec::new(),
        };

        for file in files {
            let content = match std::fs::read_to_string(&file) {
                Ok(content) => content,
                Err(e) => {
                    loaded.diagnostics.push(Diagnostic {
                        file,
                        message: format!("failed to read file: {}", e),
                    });
                    continue;
                }
            };
            match hcl::parse(&content) {
                Ok(body) => collect_body(&body, &file, &mut loaded),
                Err(e) => loaded.diagnostics.push(Diagnostic {
                    file,
                    message: format!("failed to parse HCL: {}", e),
                }),
            }
        }

        Ok(loaded)
    }
}

fn collect_body(body: &Body, file: &Utf8Path, loaded: &mut LoadedModule) {
    for block in body.blocks() {
        match block.identifier() {
            "locals" => collect_locals(block, file, loaded),
            "module" => collect_module_call(block, file, loaded),
            "terraform" => {
                for inner in block.body().blocks().filter(|b| b.identifier() == "backend") {
                    let kind = inner
                        .labels()
                        .first()
                        .map(|l| l.as_str().to_string())
                        .unwrap_or_default();
                    if loaded.module.backend.is_some() {
                        loaded.diagnostics.push(Diagnostic {
                            file: file.to_owned(),
                            message: format!("duplicate backend configuration \"{}\"", kind),
                        });
                        continue;
                    }
                    loaded.module.backend = Some(Backend { kind });
                }
            }
            _ => {}
        }
    }
}

fn collect_locals(block: &Block, file: &Utf8Path, loaded: &mut LoadedModule) {
    for attr in block.body().attributes() {
        if loaded.module.locals.contains_key(attr.key()) {
            loaded.diagnostics.push(Diagnostic {
                file: file.to_owned(),
                message: format!("duplicate local value definition \"{}\"", attr.key()),
            });
            continue;
        }
        loaded
            .module
            .locals
            .insert(attr.key().to_string(), attr.expr().clone());
    }
}

fn collect_module_call(block: &Block, file: &Utf8Path, loaded: &mut LoadedModule) {
    let name = block
        .labels()
        .first()
        .map(|l| l.as_str().to_string())
        .unwrap_or_default();

    let source = block
        .body()
        .attributes()
        .find(|a| a.key() == "source")
        .map(|a| a.expr());
    let source_addr = source.and_then(|expr| match expr.evaluate(&Context::new()) {
        Ok(Value::String(s)) => Some(s),
        _ => None,
    });
    let unresolved_source = match (&source_addr, source) {
        (None, Some(Expression::TemplateExpr(template))) => Some(template.to_string()),
        _ => None,
    };

    if source_addr.is_none() {
        loaded.diagnostics.push(Diagnostic {
            file: file.to_owned(),
            message: format!("module \"{}\" has no literal source address", name),
        });
    }

    loaded.module.module_calls.push(ModuleCall {
        name,
        source_addr,
        unresolved_source,
    });
}
