//! Change Detector (component A).
//!
//! Computes the set of added/modified/deleted files since the last index of
//! a source, preferring a git-aware diff and falling back to mtime
//! comparison when the source isn't a git working copy.
use std::path::Path;
use std::process::Command;

use tracing::warn;

use crate::crawler::{crawl, is_eligible_relative_path, CrawlOptions};

/// The inputs the orchestrator threads through change detection.
#[derive(Debug, Clone)]
pub struct ChangeDetectInput<'a> {
    pub source_path: &'a Path,
    pub last_indexed_commit: Option<&'a str>,
    pub last_indexed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub max_auto_reindex_files: usize,
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub is_git: bool,
    pub is_full: bool,
    pub current_commit: Option<String>,
    pub current_branch: Option<String>,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub threshold_exceeded: bool,
}

/// Run change detection for a source, selecting git or mtime strategy.
pub fn detect(input: &ChangeDetectInput<'_>) -> ChangeSet {
    if input.force {
        let (commit, branch) = if is_git_repo(input.source_path) {
            (current_commit(input.source_path), current_branch(input.source_path))
        } else {
            (None, None)
        };
        return ChangeSet {
            is_git: is_git_repo(input.source_path),
            is_full: true,
            current_commit: commit,
            current_branch: branch,
            ..Default::default()
        };
    }

    if is_git_repo(input.source_path) {
        detect_git(input)
    } else {
        detect_mtime(input)
    }
}

fn is_git_repo(path: &Path) -> bool {
    gix::discover(path).is_ok()
}

fn current_commit(path: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Empty string on a detached HEAD must not abort the run — callers treat
/// `None` the same as an empty branch name.
fn current_branch(path: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["symbolic-ref", "--short", "HEAD"])
        .current_dir(path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn detect_git(input: &ChangeDetectInput<'_>) -> ChangeSet {
    let current_commit_val = current_commit(input.source_path);
    let current_branch_val = current_branch(input.source_path);

    let Some(prev) = input.last_indexed_commit else {
        return apply_threshold(
            input,
            ChangeSet {
                is_git: true,
                is_full: true,
                current_commit: current_commit_val,
                current_branch: current_branch_val,
                ..Default::default()
            },
        );
    };

    let Some(current) = current_commit_val.clone() else {
        warn!(source = %input.source_path.display(), "git repository has no commits; returning empty change set");
        return ChangeSet {
            is_git: true,
            current_branch: current_branch_val,
            ..Default::default()
        };
    };

    let range = format!("{prev}..{current}");
    let output = Command::new("git")
        .args(["diff", "--name-status", "--diff-filter=ACDMR", &range])
        .current_dir(input.source_path)
        .output();

    let output = match output {
        Ok(o) if o.status.success() => o,
        _ => {
            warn!(
                source = %input.source_path.display(),
                prev, "git diff failed (missing commit after force-push or unreadable object); falling back to full index"
            );
            return apply_threshold(
                input,
                ChangeSet {
                    is_git: true,
                    is_full: true,
                    current_commit: Some(current),
                    current_branch: current_branch_val,
                    ..Default::default()
                },
            );
        }
    };

    let mut added = Vec::new();
    let mut modified = Vec::new();
    let mut deleted = Vec::new();

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let mut parts = line.splitn(2, '\t');
        let Some(status) = parts.next() else { continue };
        let Some(rest) = parts.next() else { continue };
        match status.chars().next() {
            Some('A') => added.push(rest.to_string()),
            Some('M') => modified.push(rest.to_string()),
            Some('D') => deleted.push(rest.to_string()),
            Some('R') => {
                // rest is "old\tnew" for renames; splitn above only grabbed one tab group.
                let mut paths = rest.splitn(2, '\t');
                let old = paths.next().unwrap_or_default();
                let new = paths.next().unwrap_or(old);
                deleted.push(old.to_string());
                added.push(new.to_string());
            }
            _ => {}
        }
    }

    let crawl_opts = CrawlOptions::default();
    added.retain(|p| is_eligible_relative_path(p, &crawl_opts));
    modified.retain(|p| is_eligible_relative_path(p, &crawl_opts));
    deleted.retain(|p| is_eligible_relative_path(p, &crawl_opts));

    apply_threshold(
        input,
        ChangeSet {
            is_git: true,
            is_full: false,
            current_commit: Some(current),
            current_branch: current_branch_val,
            added,
            modified,
            deleted,
            threshold_exceeded: false,
        },
    )
}

fn detect_mtime(input: &ChangeDetectInput<'_>) -> ChangeSet {
    let Some(prior) = input.last_indexed_at else {
        return apply_threshold(
            input,
            ChangeSet {
                is_full: true,
                ..Default::default()
            },
        );
    };

    let files = crawl(input.source_path, &CrawlOptions::default()).unwrap_or_default();
    let mut modified = Vec::new();
    for file in &files {
        if let Ok(meta) = std::fs::metadata(&file.absolute_path) {
            if let Ok(mtime) = meta.modified() {
                let mtime: chrono::DateTime<chrono::Utc> = mtime.into();
                if mtime > prior {
                    modified.push(file.relative_path.clone());
                }
            }
        }
    }

    apply_threshold(
        input,
        ChangeSet {
            modified,
            ..Default::default()
        },
    )
}

/// Apply the auto-reindex threshold. The threshold counts only indexable
/// code files: the git path filters diff output through the crawler's
/// eligibility rules above before reaching here, and the mtime path's
/// `modified` list already comes straight from the crawler. A threshold of
/// 0 disables the check.
fn apply_threshold(input: &ChangeDetectInput<'_>, mut set: ChangeSet) -> ChangeSet {
    if input.max_auto_reindex_files == 0 {
        set.threshold_exceeded = false;
        return set;
    }
    let total = set.added.len() + set.modified.len() + set.deleted.len();
    set.threshold_exceeded = total > input.max_auto_reindex_files;
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_zero_never_exceeds() {
        let input = ChangeDetectInput {
            source_path: Path::new("."),
            last_indexed_commit: None,
            last_indexed_at: None,
            max_auto_reindex_files: 0,
            force: false,
        };
        let mut set = ChangeSet::default();
        set.added = vec!["a".into(); 500];
        let result = apply_threshold(&input, set);
        assert!(!result.threshold_exceeded);
    }

    #[test]
    fn threshold_exceeded_when_total_over_limit() {
        let input = ChangeDetectInput {
            source_path: Path::new("."),
            last_indexed_commit: None,
            last_indexed_at: None,
            max_auto_reindex_files: 2,
            force: false,
        };
        let mut set = ChangeSet::default();
        set.added = vec!["a".into(), "b".into(), "c".into()];
        let result = apply_threshold(&input, set);
        assert!(result.threshold_exceeded);
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn init_repo(dir: &Path) {
        git(dir, &["init", "-q"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "user.name", "test"]);
    }

    #[test]
    fn git_diff_output_is_filtered_through_crawler_rules_before_threshold() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("main.ts"), "export const a = 1;").unwrap();
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "initial"]);
        let first_commit = current_commit(dir.path()).unwrap();

        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "module.exports = {}").unwrap();
        std::fs::write(dir.path().join("other.ts"), "export const b = 2;").unwrap();
        std::fs::write(dir.path().join("README.md"), "docs updated").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "second"]);

        let input = ChangeDetectInput {
            source_path: dir.path(),
            last_indexed_commit: Some(&first_commit),
            last_indexed_at: None,
            max_auto_reindex_files: 100,
            force: false,
        };
        let set = detect(&input);
        assert!(!set.is_full);
        assert_eq!(set.added, vec!["other.ts".to_string()]);
        assert!(set.modified.is_empty());
        assert!(!set.added.iter().any(|p| p.contains("node_modules")));
        assert!(!set.modified.iter().any(|p| p == "README.md"));
    }

    #[test]
    fn non_git_first_index_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let input = ChangeDetectInput {
            source_path: dir.path(),
            last_indexed_commit: None,
            last_indexed_at: None,
            max_auto_reindex_files: 100,
            force: false,
        };
        let set = detect(&input);
        assert!(set.is_full);
        assert!(set.added.is_empty());
        assert!(set.modified.is_empty());
        assert!(set.deleted.is_empty());
    }
}
