//! Execution order groups computed from project dependencies.
//!
//! Group 0 holds projects without project dependencies; every other project
//! sits one group above its highest dependency.

use std::collections::HashMap;

use camino::Utf8Path;

use crate::project::Project;
use crate::resolver::{normalize_path, parent_dir};

/// Directory of the project owning a watched path, relative to the repo root
fn dependency_dir(project_dir: &str, watched: &str) -> String {
    let joined = normalize_path(&Utf8Path::new(project_dir).join(watched));
    parent_dir(&joined).into_string()
}

/// Assign `execution_order_group` to every project and sort by (group, dir).
///
/// Watched paths that do not fall directly in another project's directory
/// are plain file dependencies and do not affect the group. The iteration is
/// bounded by the number of projects; if groups still change after that, the
/// graph has a cycle and the last computed groups stay.
///
/// Returns `false` when the groups did not converge.
pub fn assign_execution_order_groups(projects: &mut [Project]) -> bool {
    let index: HashMap<String, usize> = projects
        .iter()
        .enumerate()
        .map(|(i, p)| (p.dir.clone(), i))
        .collect();

    let mut has_changes = true;
    let mut iteration = 0;
    while has_changes && iteration <= projects.len() {
        has_changes = false;
        iteration += 1;

        for i in 0..projects.len() {
            let mut group = 0;
            for watched in &projects[i].autoplan.when_modified {
                let dir = dependency_dir(&projects[i].dir, watched);
                if dir == projects[i].dir {
                    continue;
                }
                if let Some(&dep) = index.get(&dir) {
                    group = group.max(projects[dep].execution_order_group + 1);
                }
            }

            if projects[i].execution_order_group != group {
                projects[i].execution_order_group = group;
                has_changes = true;
            }
        }
    }

    sort_by_group(projects);
    !has_changes
}

/// Sort by directory only.
pub fn sort_by_dir(projects: &mut [Project]) {
    projects.sort_by(|a, b| a.dir.cmp(&b.dir));
}

/// Sort by execution order group, then directory.
pub fn sort_by_group(projects: &mut [Project]) {
    projects.sort_by(|a, b| {
        a.execution_order_group
            .cmp(&b.execution_order_group)
            .then_with(|| a.dir.cmp(&b.dir))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Autoplan;
    use rstest::rstest;

    fn project(dir: &str, watched: &[&str]) -> Project {
        let mut when_modified = vec!["*.tf*".to_string()];
        when_modified.extend(watched.iter().map(|w| w.to_string()));
        Project {
            dir: dir.to_string(),
            workflow: String::new(),
            terraform_version: String::new(),
            apply_requirements: None,
            autoplan: Autoplan {
                enabled: false,
                when_modified,
            },
            name: None,
            workspace: None,
            execution_order_group: 0,
        }
    }

    fn groups(projects: &[Project]) -> Vec<(&str, i64)> {
        projects
            .iter()
            .map(|p| (p.dir.as_str(), p.execution_order_group))
            .collect()
    }

    #[rstest]
    #[case("x", "../y/*.tf*", "y")]
    #[case("x", "*.tf*", "x")]
    #[case(".", "*.tf*", ".")]
    #[case(".", "a/main.tf", "a")]
    #[case("a/b", "../../shared/*.tf*", "shared")]
    fn test_dependency_dir(#[case] dir: &str, #[case] watched: &str, #[case] expected: &str) {
        assert_eq!(dependency_dir(dir, watched), expected);
    }

    #[test]
    fn test_no_dependencies() {
        let mut projects = vec![project("b", &[]), project("a", &[])];

        assert!(assign_execution_order_groups(&mut projects));

        assert_eq!(groups(&projects), vec![("a", 0), ("b", 0)]);
    }

    #[test]
    fn test_simple_dependency() {
        let mut projects = vec![project("x", &["../y/*.tf*"]), project("y", &[])];

        assign_execution_order_groups(&mut projects);

        assert_eq!(groups(&projects), vec![("y", 0), ("x", 1)]);
    }

    #[test]
    fn test_chain_declared_out_of_order() {
        // a -> b -> c, listed so that a single pass is not enough
        let mut projects = vec![
            project("a", &["../b/*.tf*"]),
            project("b", &["../c/main.tf"]),
            project("c", &[]),
        ];

        assert!(assign_execution_order_groups(&mut projects));

        assert_eq!(groups(&projects), vec![("c", 0), ("b", 1), ("a", 2)]);
    }

    #[test]
    fn test_diamond() {
        let mut projects = vec![
            project("a", &[]),
            project("b", &["../a/*.tf*"]),
            project("c", &["../a/*.tf*"]),
            project("d", &["../b/*.tf*", "../c/*.tf*"]),
        ];

        assert!(assign_execution_order_groups(&mut projects));

        assert_eq!(groups(&projects), vec![("a", 0), ("b", 1), ("c", 1), ("d", 2)]);
    }

    #[test]
    fn test_unknown_dependency_owner_is_ignored() {
        // a/b calls ../shared which is not a project
        let mut projects = vec![project("a", &[]), project("a/b", &["../shared/*.tf*"])];

        assign_execution_order_groups(&mut projects);

        assert_eq!(groups(&projects), vec![("a", 0), ("a/b", 0)]);
    }

    #[test]
    fn test_nested_file_is_not_a_project_edge() {
        // A file below another project's directory is not that project's dir.
        let mut projects = vec![project("x", &["../y/sub/main.tf"]), project("y", &[])];

        assign_execution_order_groups(&mut projects);

        assert_eq!(groups(&projects), vec![("x", 0), ("y", 0)]);
    }

    #[test]
    fn test_group_respects_every_dependency() {
        let mut projects = vec![
            project("app", &["../db/*.tf*", "../net/*.tf*"]),
            project("db", &["../net/*.tf*"]),
            project("net", &[]),
            project("tools", &["../net/*.tf*"]),
        ];

        assign_execution_order_groups(&mut projects);

        let by_dir: HashMap<&str, i64> = groups(&projects).into_iter().collect();
        for p in &projects {
            for w in &p.autoplan.when_modified {
                let dir = dependency_dir(&p.dir, w);
                if dir != p.dir {
                    if let Some(dep_group) = by_dir.get(dir.as_str()) {
                        assert!(p.execution_order_group >= dep_group + 1);
                    }
                }
            }
        }
        assert_eq!(by_dir["app"], 2);
    }

    #[test]
    fn test_cycle_terminates_without_converging() {
        let mut projects = vec![project("x", &["../y/*.tf*"]), project("y", &["../x/*.tf*"])];

        assert!(!assign_execution_order_groups(&mut projects));

        assert_eq!(projects.len(), 2);
        assert!(projects[0].execution_order_group <= projects[1].execution_order_group);
    }

    #[test]
    fn test_existing_groups_are_recomputed() {
        let mut projects = vec![project("a", &[])];
        projects[0].execution_order_group = 5;

        assign_execution_order_groups(&mut projects);

        assert_eq!(projects[0].execution_order_group, 0);
    }

    #[test]
    fn test_sort_by_dir() {
        let mut projects = vec![project("b", &[]), project("a/c", &[]), project("a", &[])];

        sort_by_dir(&mut projects);

        let dirs: Vec<&str> = projects.iter().map(|p| p.dir.as_str()).collect();
        assert_eq!(dirs, vec!["a", "a/c", "b"]);
    }
}
