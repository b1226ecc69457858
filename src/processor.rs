//! Parallel generation of the Atlantis config.
//!
//! Root modules of each working directory are built on a bounded rayon pool
//! and merged into one project list. The first failure stops the run.

use std::sync::{Mutex, PoisonError};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::discovery::{DiscoveryError, find_all_root_modules};
use crate::layers::{assign_execution_order_groups, sort_by_dir};
use crate::options::GenerateOptions;
use crate::output::{AtlantisConfig, OutputError, load_previous_config, write_config};
use crate::parser::ModuleLoader;
use crate::project::{Project, ProjectBuilder, ProjectError};
use crate::resolver::DependencyCache;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("failed to create project for {dir}: {source}")]
    Project {
        dir: String,
        #[source]
        source: ProjectError,
    },
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Insert `project`, replacing an existing entry with the same dir when
/// `preserve` is set.
///
/// Returns `true` when an existing project was replaced.
pub fn merge_project(projects: &mut Vec<Project>, project: Project, preserve: bool) -> bool {
    if preserve {
        if let Some(existing) = projects.iter_mut().find(|p| p.dir == project.dir) {
            *existing = project;
            return true;
        }
    }
    projects.push(project);
    false
}

/// Seed a new config, carrying over sections of `previous` as configured.
pub fn initial_config(options: &GenerateOptions, previous: Option<AtlantisConfig>) -> AtlantisConfig {
    let mut config = AtlantisConfig::new(options.automerge, options.parallel);
    if let Some(previous) = previous {
        if options.preserve_workflows {
            config.workflows = previous.workflows;
        }
        if options.preserve_projects {
            config.projects = previous.projects;
        }
    }
    config
}

/// Build the config for the repository described by `options`.
pub fn generate(
    options: &GenerateOptions,
    loader: &dyn ModuleLoader,
) -> Result<AtlantisConfig, GenerateError> {
    let previous = match &options.output {
        Some(path) if options.preserve_workflows || options.preserve_projects => {
            load_previous_config(path)?
        }
        _ => None,
    };
    let mut config = initial_config(options, previous);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.num_executors.max(1))
        .build()?;
    let cache = DependencyCache::new();
    let builder = ProjectBuilder::new(options, loader, &cache);
    let projects = Mutex::new(std::mem::take(&mut config.projects));

    let module_dirs = find_all_root_modules(
        &options.working_dirs(),
        &options.repo_root,
        options.filter.as_deref(),
        loader,
    )?;
    info!(count = module_dirs.len(), "found root modules");

    pool.install(|| {
        module_dirs.par_iter().try_for_each(|module_dir| {
            let Some(project) = builder.build(module_dir).map_err(|source| {
                GenerateError::Project {
                    dir: module_dir.to_string(),
                    source,
                }
            })?
            else {
                return Ok(());
            };

            let mut projects = projects.lock().unwrap_or_else(PoisonError::into_inner);
            if merge_project(&mut projects, project, options.preserve_projects) {
                info!(module = %module_dir, "updated project");
            } else {
                info!(module = %module_dir, "created project");
            }
            Ok::<(), GenerateError>(())
        })
    })?;

    let (cached_modules, dependencies) = cache.stats();
    debug!(cached_modules, dependencies, "dependency cache stats");

    config.projects = projects.into_inner().unwrap_or_else(PoisonError::into_inner);
    sort_by_dir(&mut config.projects);

    if options.execution_order_groups && !assign_execution_order_groups(&mut config.projects) {
        warn!("computing execution_order_group did not converge, probably a dependency cycle exists");
    }

    Ok(config)
}

/// Generate the config and write it to the configured output, or return it
/// as YAML when no output path is set.
pub fn run(options: &GenerateOptions, loader: &dyn ModuleLoader) -> Result<Option<String>, GenerateError> {
    let config = generate(options, loader)?;
    match &options.output {
        Some(path) => {
            write_config(&config, path)?;
            info!(path = %path, projects = config.projects.len(), "wrote config");
            Ok(None)
        }
        None => Ok(Some(config.to_yaml()?)),
    }
}
