//! Project representation and the builder that turns a root module into one.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::locals::resolve_locals;
use crate::options::GenerateOptions;
use crate::parser::{ModuleLoader, ParseError};
use crate::resolver::{
    DependencyCache, DependencyError, make_absolute, relative_path, to_slash, unique_strings,
};

/// An Atlantis project: one directory that is planned and applied on its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Directory relative to the repository root, `/`-separated
    pub dir: String,
    #[serde(default)]
    pub workflow: String,
    #[serde(default)]
    pub terraform_version: String,
    /// `None` defers to the server-side default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_requirements: Option<Vec<String>>,
    #[serde(default)]
    pub autoplan: Autoplan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub execution_order_group: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Autoplan {
    #[serde(default)]
    pub enabled: bool,
    /// Globs relative to the project dir; unique, in first-seen order
    #[serde(default)]
    pub when_modified: Vec<String>,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("failed to resolve dependencies: {0}")]
    Dependency(#[from] DependencyError),
    #[error("dependency {dependency} cannot be made relative to {dir}")]
    NotRelative { dir: Utf8PathBuf, dependency: String },
}

/// Builds [`Project`]s from root module directories.
///
/// Shared across worker threads; the dependency cache coalesces work for
/// directories visited more than once.
pub struct ProjectBuilder<'a> {
    options: &'a GenerateOptions,
    loader: &'a dyn ModuleLoader,
    cache: &'a DependencyCache,
}

impl<'a> ProjectBuilder<'a> {
    pub fn new(
        options: &'a GenerateOptions,
        loader: &'a dyn ModuleLoader,
        cache: &'a DependencyCache,
    ) -> Self {
        Self {
            options,
            loader,
            cache,
        }
    }

    /// Build the project for `module_dir`.
    ///
    /// `Ok(None)` means the module asked to be skipped.
    pub fn build(&self, module_dir: &Utf8Path) -> Result<Option<Project>, ProjectError> {
        // Diagnostics were already tolerated when the directory was discovered.
        let loaded = self.loader.load_dir(module_dir)?;
        for diagnostic in &loaded.diagnostics {
            debug!(%diagnostic, "module loaded with diagnostics");
        }
        let module = loaded.module;

        let settings = resolve_locals(&module.locals);
        if settings.is_skipped() {
            debug!(module = %module_dir, "skipping module");
            return Ok(None);
        }

        let Some(dependencies) = self.cache.get_or_resolve(&module, &settings, self.options)?
        else {
            return Ok(None);
        };

        let mut when_modified = self.options.autoplan_file_list.clone();
        for dependency in &dependencies {
            let absolute = make_absolute(dependency, &module.source_dir);
            let relative = relative_path(&module.source_dir, Utf8Path::new(&absolute)).ok_or_else(
                || ProjectError::NotRelative {
                    dir: module.source_dir.clone(),
                    dependency: dependency.clone(),
                },
            )?;
            when_modified.push(to_slash(relative.as_str()));
        }

        let dir = project_dir(&module.source_dir, &self.options.repo_root);

        let workflow = settings
            .workflow
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| self.options.default_workflow.clone());

        let terraform_version = settings
            .terraform_version
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.options.default_terraform_version.clone());

        // An empty global default means "unset", not "no requirements".
        let apply_requirements = settings.apply_requirements.or_else(|| {
            let defaults = &self.options.default_apply_requirements;
            (!defaults.is_empty()).then(|| defaults.clone())
        });

        let name = project_name(&dir);

        Ok(Some(Project {
            workflow,
            terraform_version,
            apply_requirements,
            autoplan: Autoplan {
                enabled: settings.autoplan.unwrap_or(self.options.autoplan),
                when_modified: unique_strings(when_modified),
            },
            name: self.options.create_project_name.then(|| name.clone()),
            workspace: self.options.create_workspace.then_some(name),
            execution_order_group: settings.execution_order_group.max(0),
            dir,
        }))
    }
}

/// Directory of a module relative to the repository root, `.` for the root itself.
pub fn project_dir(source_dir: &Utf8Path, repo_root: &Utf8Path) -> String {
    let relative = source_dir
        .strip_prefix(repo_root)
        .map(Utf8Path::as_str)
        .unwrap_or(source_dir.as_str());
    let relative = to_slash(relative);
    let relative = relative.trim_end_matches('/');
    if relative.is_empty() {
        ".".to_string()
    } else {
        relative.to_string()
    }
}

/// Name usable as both project name and workspace.
///
/// Terraform Cloud only allows letters, digits, `-` and `_`, so every run of
/// other characters becomes a single `_`.
pub fn project_name(dir: &str) -> String {
    let mut name = String::with_capacity(dir.len());
    let mut in_run = false;
    for c in dir.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            name.push(c);
            in_run = false;
        } else if !in_run {
            name.push('_');
            in_run = true;
        }
    }
    name
}
