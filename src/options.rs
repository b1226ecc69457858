//! Options for a single generation run.

use camino::{Utf8Path, Utf8PathBuf};

use crate::resolver::normalize_path;

/// Glob of module-local files included in every project's autoplan list
pub const DEFAULT_AUTOPLAN_FILE_GLOB: &str = "*.tf*";

pub const DEFAULT_NUM_EXECUTORS: usize = 15;

/// Everything a run needs to know, built once and passed down by reference.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Absolute path of the repository root; project dirs are relative to it
    pub repo_root: Utf8PathBuf,
    /// Directories to scan. Empty means the repository root.
    pub working_dirs: Vec<Utf8PathBuf>,
    /// Glob narrowing the scanned directories
    pub filter: Option<String>,
    /// Where the config is written; also the previous config to preserve from
    pub output: Option<Utf8PathBuf>,

    pub autoplan: bool,
    pub automerge: bool,
    pub parallel: bool,
    pub ignore_local_submodules: bool,
    pub local_submodules_exclude: Vec<String>,
    pub autoplan_file_list: Vec<String>,
    pub create_workspace: bool,
    pub create_project_name: bool,
    pub preserve_workflows: bool,
    pub preserve_projects: bool,
    pub default_workflow: String,
    pub default_apply_requirements: Vec<String>,
    pub default_terraform_version: String,
    pub num_executors: usize,
    pub execution_order_groups: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            repo_root: Utf8PathBuf::from("."),
            working_dirs: Vec::new(),
            filter: None,
            output: None,
            autoplan: false,
            automerge: false,
            parallel: true,
            ignore_local_submodules: false,
            local_submodules_exclude: Vec::new(),
            autoplan_file_list: vec![DEFAULT_AUTOPLAN_FILE_GLOB.to_string()],
            create_workspace: false,
            create_project_name: false,
            preserve_workflows: true,
            preserve_projects: false,
            default_workflow: String::new(),
            default_apply_requirements: Vec::new(),
            default_terraform_version: String::new(),
            num_executors: DEFAULT_NUM_EXECUTORS,
            execution_order_groups: false,
        }
    }
}

impl GenerateOptions {
    /// Options rooted at `repo_root`, made absolute against the current directory.
    pub fn for_root(repo_root: &Utf8Path) -> std::io::Result<Self> {
        Ok(Self {
            repo_root: absolute(repo_root)?,
            ..Default::default()
        })
    }

    /// Directories to scan, falling back to the repository root
    pub fn working_dirs(&self) -> Vec<Utf8PathBuf> {
        if self.working_dirs.is_empty() {
            vec![self.repo_root.clone()]
        } else {
            self.working_dirs.clone()
        }
    }
}

/// Make a path absolute without touching the filesystem beyond the current dir.
pub fn absolute(path: &Utf8Path) -> std::io::Result<Utf8PathBuf> {
    let absolute = std::path::absolute(path)?;
    let absolute = Utf8PathBuf::from_path_buf(absolute).map_err(|p| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path is not valid UTF-8: {}", p.display()),
        )
    })?;
    Ok(normalize_path(&absolute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = GenerateOptions::default();

        assert!(options.parallel);
        assert!(options.preserve_workflows);
        assert!(!options.preserve_projects);
        assert_eq!(options.autoplan_file_list, vec!["*.tf*"]);
        assert_eq!(options.num_executors, 15);
    }

    #[test]
    fn test_for_root_is_absolute() {
        let options = GenerateOptions::for_root(Utf8Path::new("some/relative/../dir")).unwrap();

        assert!(options.repo_root.is_absolute());
        assert!(options.repo_root.ends_with("some/dir"));
    }

    #[test]
    fn test_working_dirs_fall_back_to_root() {
        let options = GenerateOptions {
            repo_root: Utf8PathBuf::from("/repo"),
            ..Default::default()
        };
        assert_eq!(options.working_dirs(), vec![Utf8PathBuf::from("/repo")]);

        let options = GenerateOptions {
            working_dirs: vec![Utf8PathBuf::from("/repo/live")],
            ..options
        };
        assert_eq!(options.working_dirs(), vec![Utf8PathBuf::from("/repo/live")]);
    }
}
