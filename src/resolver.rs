//! Resolve the paths a module depends on.
//!
//! Dependencies come from two places: the `extra_dependencies` setting and
//! local module calls (`source = "../modules/x"`). Both end up as absolute,
//! slash-separated paths or globs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::locals::ModuleSettings;
use crate::options::GenerateOptions;
use crate::parser::Module;

/// Address prefixes that mark a module source as living in this repository
const LOCAL_MODULE_SOURCE_PREFIXES: &[&str] = &["./", "../", ".\\", "..\\"];

/// Files of a called local module that trigger a replan
const LOCAL_MODULE_GLOB: &str = "*.tf*";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DependencyError {
    #[error("local module \"{call}\" in {module_dir} has no literal source address")]
    MissingSource { module_dir: Utf8PathBuf, call: String },
}

/// Convert platform separators to `/`.
pub fn to_slash(path: &str) -> String {
    if std::path::MAIN_SEPARATOR == '/' {
        path.to_string()
    } else {
        path.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Normalize a path by resolving . and .. components.
/// Does NOT require the path to exist (pure string manipulation).
pub fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Utf8Component::ParentDir => match components.last() {
                Some(Utf8Component::Normal(_)) => {
                    components.pop();
                }
                // `/..` is `/`
                Some(Utf8Component::RootDir) | Some(Utf8Component::Prefix(_)) => {}
                _ => components.push(component),
            },
            Utf8Component::CurDir => {}
            _ => components.push(component),
        }
    }

    if components.is_empty() {
        return Utf8PathBuf::from(".");
    }
    components.iter().collect()
}

/// Directory part of a path, `.` when there is none.
pub fn parent_dir(path: &Utf8Path) -> Utf8PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    }
}

/// Make `path` absolute relative to `base_dir`. Absolute paths are returned unchanged.
pub fn make_absolute(path: &str, base_dir: &Utf8Path) -> String {
    if Utf8Path::new(path).is_absolute() {
        return path.to_string();
    }
    normalize_path(&base_dir.join(path)).into_string()
}

/// Express `target` relative to `base`. Both must be absolute.
///
/// Returns `None` when the two paths share no root (e.g. different drives).
pub fn relative_path(base: &Utf8Path, target: &Utf8Path) -> Option<Utf8PathBuf> {
    let base = normalize_path(base);
    let target = normalize_path(target);

    let base_parts: Vec<_> = base.components().collect();
    let target_parts: Vec<_> = target.components().collect();

    if base_parts.first() != target_parts.first() {
        return None;
    }

    let common = base_parts
        .iter()
        .zip(&target_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = Utf8PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &target_parts[common..] {
        relative.push(part.as_str());
    }

    if relative.as_str().is_empty() {
        return Some(Utf8PathBuf::from("."));
    }
    Some(relative)
}

/// Keep the first occurrence of every value, preserving order.
pub fn unique_strings<I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

pub fn is_local_module_source(addr: &str) -> bool {
    LOCAL_MODULE_SOURCE_PREFIXES
        .iter()
        .any(|prefix| addr.starts_with(prefix))
}

pub fn is_excluded_submodule(addr: &str, exclude: &[String]) -> bool {
    exclude.iter().any(|pattern| addr.contains(pattern.as_str()))
}

/// Globs matching the files of every local module called by `module`.
///
/// Only direct calls are followed; the called modules' own local calls are
/// not resolved. Results are sorted and unique.
///
/// A call whose source cannot be evaluated is skipped unless its raw template
/// looks local, in which case the dependency cannot be resolved and it is an
/// error.
pub fn local_module_sources(
    module: &Module,
    exclude: &[String],
) -> Result<Vec<String>, DependencyError> {
    let mut sources = HashSet::new();

    for call in &module.module_calls {
        let Some(addr) = call.source_addr.as_deref() else {
            if call.unresolved_source.as_deref().is_some_and(is_local_module_source) {
                return Err(DependencyError::MissingSource {
                    module_dir: module.source_dir.clone(),
                    call: call.name.clone(),
                });
            }
            debug!(
                module = %module.source_dir,
                call = %call.name,
                "skipping module call without literal source"
            );
            continue;
        };
        if !is_local_module_source(addr) || is_excluded_submodule(addr, exclude) {
            continue;
        }

        let module_path = normalize_path(&module.source_dir.join(addr.replace('\\', "/")));
        sources.insert(to_slash(module_path.join(LOCAL_MODULE_GLOB).as_str()));
    }

    let mut sources: Vec<String> = sources.into_iter().collect();
    sources.sort();
    Ok(sources)
}

/// Compute the dependency paths of a module.
///
/// Returns `Ok(None)` when the module must not produce a project at all, as
/// opposed to `Ok(Some(vec![]))` for a module without dependencies.
pub fn resolve_dependencies(
    module: &Module,
    settings: &ModuleSettings,
    options: &GenerateOptions,
) -> Result<Option<Vec<String>>, DependencyError> {
    if settings.is_skipped() {
        return Ok(None);
    }

    let mut dependencies = unique_strings(settings.extra_dependencies.iter().flatten().cloned());

    if !options.ignore_local_submodules {
        dependencies.extend(local_module_sources(module, &options.local_submodules_exclude)?);
    }

    let dependencies = dependencies
        .into_iter()
        .filter(|dep| !dep.is_empty())
        .map(|dep| to_slash(&make_absolute(&dep, &module.source_dir)));

    Ok(Some(unique_strings(dependencies)))
}

type SharedResult = Result<Option<Vec<String>>, DependencyError>;

/// Per-run cache that coalesces dependency resolution by module directory.
///
/// Concurrent callers for the same directory block on a single computation
/// and all receive its result, error included.
#[derive(Debug, Default)]
pub struct DependencyCache {
    entries: Mutex<HashMap<Utf8PathBuf, Arc<OnceLock<SharedResult>>>>,
}

impl DependencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_resolve(
        &self,
        module: &Module,
        settings: &ModuleSettings,
        options: &GenerateOptions,
    ) -> SharedResult {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(module.source_dir.clone()).or_default())
        };

        cell.get_or_init(|| {
            debug!(module = %module.source_dir, "resolving dependencies");
            resolve_dependencies(module, settings, options)
        })
        .clone()
    }

    /// Number of cached modules and the total number of dependencies across them
    pub fn stats(&self) -> (usize, usize) {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let total = entries
            .values()
            .filter_map(|cell| cell.get())
            .filter_map(|res| res.as_ref().ok())
            .flatten()
            .map(Vec::len)
            .sum();
        (entries.len(), total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ModuleCall;
    use rstest::rstest;
    use std::sync::Barrier;
    use std::thread;

    fn module(dir: &str, sources: &[&str]) -> Module {
        Module {
            source_dir: Utf8PathBuf::from(dir),
            module_calls: sources
                .iter()
                .enumerate()
                .map(|(i, s)| ModuleCall {
                    name: format!("m{}", i),
                    source_addr: Some(s.to_string()),
                    unresolved_source: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn options() -> GenerateOptions {
        GenerateOptions {
            repo_root: Utf8PathBuf::from("/repo"),
            ..Default::default()
        }
    }

    // ============== path helpers ==============

    #[rstest]
    #[case("/repo/live/prod/../sg", "/repo/live/sg")]
    #[case("/repo/./a/b/../../c", "/repo/c")]
    #[case("a/../b/*.tf*", "b/*.tf*")]
    #[case("x/../..", "..")]
    #[case("/..", "/")]
    #[case("a/..", ".")]
    fn test_normalize_path(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_path(Utf8Path::new(input)), Utf8PathBuf::from(expected));
    }

    #[rstest]
    #[case("/repo/a/", "/repo/a/main.tf", "main.tf")]
    #[case("/repo/a", "/repo/shared/*.tf*", "../shared/*.tf*")]
    #[case("/repo/a/b", "/repo", "../..")]
    #[case("/repo/a", "/repo/a", ".")]
    fn test_relative_path(#[case] base: &str, #[case] target: &str, #[case] expected: &str) {
        assert_eq!(
            relative_path(Utf8Path::new(base), Utf8Path::new(target)),
            Some(Utf8PathBuf::from(expected))
        );
    }

    #[test]
    fn test_relative_path_needs_shared_root() {
        assert_eq!(relative_path(Utf8Path::new("/repo"), Utf8Path::new("repo")), None);
    }

    #[rstest]
    #[case("../shared", "/repo/a", "/repo/shared")]
    #[case("/abs/file.tf", "/repo/a", "/abs/file.tf")]
    #[case("/repo/modules/x", "/repo/a", "/repo/modules/x")]
    #[case("config.yaml", "/repo/a", "/repo/a/config.yaml")]
    fn test_make_absolute(#[case] path: &str, #[case] base: &str, #[case] expected: &str) {
        assert_eq!(
            make_absolute(path, Utf8Path::new(base)),
            expected
        );
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir(Utf8Path::new("a/b/*.tf")), Utf8PathBuf::from("a/b"));
        assert_eq!(parent_dir(Utf8Path::new("*.tf*")), Utf8PathBuf::from("."));
    }

    #[test]
    fn test_unique_strings_keeps_first_seen_order() {
        let values = ["b", "a", "b", "c", "a"].map(String::from);
        assert_eq!(unique_strings(values), vec!["b", "a", "c"]);
    }

    // ============== local module sources ==============

    #[rstest]
    #[case("./child", true)]
    #[case("../sibling", true)]
    #[case(".\\win", true)]
    #[case("..\\win", true)]
    #[case("terraform-aws-modules/vpc/aws", false)]
    #[case("git::https://example.com/mod.git", false)]
    #[case("/abs/module", false)]
    fn test_is_local_module_source(#[case] addr: &str, #[case] expected: bool) {
        assert_eq!(is_local_module_source(addr), expected);
    }

    #[test]
    fn test_local_module_sources() {
        let module = module(
            "/repo/app",
            &["../modules/vpc", "./nested", "hashicorp/consul/aws", "../modules/vpc/"],
        );

        let sources = local_module_sources(&module, &[]).unwrap();

        assert_eq!(
            sources,
            vec!["/repo/app/nested/*.tf*", "/repo/modules/vpc/*.tf*"]
        );
    }

    #[test]
    fn test_local_module_sources_exclusions() {
        let module = module("/repo/app", &["../modules/vpc", "../modules/legacy-db"]);

        let sources = local_module_sources(&module, &["legacy".to_string()]).unwrap();

        assert_eq!(sources, vec!["/repo/modules/vpc/*.tf*"]);
    }

    #[test]
    fn test_local_module_sources_unresolved_local_source_is_an_error() {
        let mut module = module("/repo/app", &[]);
        module.module_calls.push(ModuleCall {
            name: "dynamic".to_string(),
            source_addr: None,
            unresolved_source: Some("../modules/${var.name}".to_string()),
        });

        let err = local_module_sources(&module, &[]).unwrap_err();

        assert_eq!(
            err,
            DependencyError::MissingSource {
                module_dir: Utf8PathBuf::from("/repo/app"),
                call: "dynamic".to_string(),
            }
        );
    }

    #[rstest]
    #[case::missing(None)]
    #[case::registry_template(Some("org/${var.name}/aws"))]
    fn test_local_module_sources_skips_non_local_unresolved_source(#[case] raw: Option<&str>) {
        let mut module = module("/repo/app", &["../modules/vpc"]);
        module.module_calls.push(ModuleCall {
            name: "dynamic".to_string(),
            source_addr: None,
            unresolved_source: raw.map(str::to_string),
        });

        let sources = local_module_sources(&module, &[]).unwrap();

        assert_eq!(sources, vec!["/repo/modules/vpc/*.tf*"]);
    }

    // ============== aggregation ==============

    #[test]
    fn test_resolve_dependencies_merges_extra_and_local() {
        let module = module("/repo/app", &["../modules/vpc"]);
        let settings = ModuleSettings {
            extra_dependencies: Some(vec![
                "../config.yaml".to_string(),
                "".to_string(),
                "../config.yaml".to_string(),
                "/repo/modules/vpc/*.tf*".to_string(),
            ]),
            ..Default::default()
        };

        let deps = resolve_dependencies(&module, &settings, &options()).unwrap();

        assert_eq!(
            deps,
            Some(vec![
                "/repo/config.yaml".to_string(),
                "/repo/modules/vpc/*.tf*".to_string(),
            ])
        );
    }

    #[test]
    fn test_resolve_dependencies_ignoring_local_submodules() {
        let module = module("/repo/app", &["../modules/vpc"]);
        let options = GenerateOptions {
            ignore_local_submodules: true,
            ..options()
        };

        let deps = resolve_dependencies(&module, &ModuleSettings::default(), &options).unwrap();

        assert_eq!(deps, Some(vec![]));
    }

    #[test]
    fn test_resolve_dependencies_skip_sentinel() {
        let module = module("/repo/app", &["../modules/vpc"]);
        let settings = ModuleSettings {
            skip: Some(true),
            ..Default::default()
        };

        let deps = resolve_dependencies(&module, &settings, &options()).unwrap();

        assert_eq!(deps, None);
    }

    #[test]
    fn test_resolve_dependencies_is_idempotent() {
        let module = module("/repo/app", &["../b", "../a", "../b"]);
        let settings = ModuleSettings::default();

        let first = resolve_dependencies(&module, &settings, &options()).unwrap();
        let second = resolve_dependencies(&module, &settings, &options()).unwrap();

        assert_eq!(first, second);
    }

    // ============== coalescing cache ==============

    #[test]
    fn test_cache_coalesces_concurrent_callers() {
        let cache = DependencyCache::new();
        let module = module("/repo/app", &["../modules/vpc"]);
        let settings = ModuleSettings::default();
        let options = options();
        let barrier = Barrier::new(8);

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache.get_or_resolve(&module, &settings, &options)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_cache_shares_errors() {
        let cache = DependencyCache::new();
        let mut module = module("/repo/app", &[]);
        module.module_calls.push(ModuleCall {
            name: "dynamic".to_string(),
            source_addr: None,
            unresolved_source: Some("./${local.path}".to_string()),
        });
        let settings = ModuleSettings::default();

        let first = cache.get_or_resolve(&module, &settings, &options());
        let second = cache.get_or_resolve(&module, &settings, &options());

        assert!(first.is_err());
        assert_eq!(first, second);
        assert_eq!(cache.stats(), (1, 0));
    }
}
