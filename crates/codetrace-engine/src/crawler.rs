//! Crawler (component C).
//!
//! Walks a source directory and returns the files eligible for parsing,
//! honoring `.gitignore`, a skip-directory list, a lockfile denylist, and a
//! max file size.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const SKIP_DIRS: &[&str] = &["node_modules", "dist", "build", ".next", "vendor", "testdata", ".git"];
const LOCKFILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "go.sum",
];
const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "go"];
const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024;

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub allowed_extensions: Vec<String>,
    pub max_file_size: u64,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawledFile {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    pub extension: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlResult {
    pub files: Vec<CrawledFile>,
    pub extension_histogram: HashMap<String, usize>,
}

/// Walk `root`, returning every eligible file. Honors `.gitignore` via the
/// `ignore` crate's walk builder, which also applies our skip-directory and
/// extension rules as overrides.
pub fn crawl(root: &Path, opts: &CrawlOptions) -> std::io::Result<Vec<CrawledFile>> {
    Ok(crawl_with_histogram(root, opts)?.files)
}

pub fn crawl_with_histogram(root: &Path, opts: &CrawlOptions) -> std::io::Result<CrawlResult> {
    let mut result = CrawlResult::default();
    if !root.exists() {
        return Ok(result);
    }

    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .build();

    for entry in walker {
        let Ok(entry) = entry else { continue };
        let path = entry.path();

        if is_in_skip_dir(root, path) {
            continue;
        }

        let Some(file_type) = entry.file_type() else { continue };
        if !file_type.is_file() {
            continue;
        }
        if path.is_symlink() {
            continue;
        }

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if LOCKFILES.contains(&file_name) {
            continue;
        }

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
        let ext = ext.to_lowercase();
        if !opts.allowed_extensions.iter().any(|a| a == &ext) {
            continue;
        }

        let Ok(metadata) = std::fs::symlink_metadata(path) else { continue };
        let size = metadata.len();
        if size > opts.max_file_size {
            continue;
        }

        let relative_path = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        *result.extension_histogram.entry(ext.clone()).or_insert(0) += 1;
        result.files.push(CrawledFile {
            absolute_path: path.to_path_buf(),
            relative_path,
            extension: ext,
            size,
        });
    }

    Ok(result)
}

/// Apply the crawler's directory/lockfile/extension rules to a
/// source-root-relative path string, without touching the filesystem — used
/// by the change detector to filter `git diff` output (which may name
/// deleted files that no longer exist on disk) before the auto-reindex
/// threshold check. The max-file-size rule is skipped here since it has no
/// meaning for a path that may not exist.
pub fn is_eligible_relative_path(relative_path: &str, opts: &CrawlOptions) -> bool {
    let path = Path::new(relative_path);

    if path.components().any(|c| {
        let s = c.as_os_str().to_string_lossy();
        SKIP_DIRS.contains(&s.as_ref()) || (s.starts_with('.') && s != ".")
    }) {
        return false;
    }

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if LOCKFILES.contains(&file_name) {
        return false;
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => opts.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

fn is_in_skip_dir(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else { return false };
    relative.components().any(|c| {
        let s = c.as_os_str().to_string_lossy();
        SKIP_DIRS.contains(&s.as_ref()) || (s.starts_with('.') && s != ".")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn skips_git_and_node_modules_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/config"), "x").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(dir.path().join("main.ts"), "export const x = 1;").unwrap();

        let files = crawl(dir.path(), &CrawlOptions::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "main.ts");
    }

    #[test]
    fn skips_lockfiles_and_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pnpm-lock.yaml"), "x").unwrap();
        fs::write(dir.path().join("big.go"), "x".repeat(200 * 1024)).unwrap();
        fs::write(dir.path().join("small.go"), "package main").unwrap();

        let files = crawl(dir.path(), &CrawlOptions::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "small.go");
    }

    #[test]
    fn eligible_relative_path_applies_crawler_rules_without_touching_disk() {
        let opts = CrawlOptions::default();
        assert!(is_eligible_relative_path("src/index.ts", &opts));
        assert!(!is_eligible_relative_path("node_modules/pkg/index.js", &opts));
        assert!(!is_eligible_relative_path("pnpm-lock.yaml", &opts));
        assert!(!is_eligible_relative_path("README.md", &opts));
    }

    #[test]
    fn builds_extension_histogram() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "x").unwrap();
        fs::write(dir.path().join("b.ts"), "x").unwrap();
        fs::write(dir.path().join("c.go"), "x").unwrap();

        let result = crawl_with_histogram(dir.path(), &CrawlOptions::default()).unwrap();
        assert_eq!(result.extension_histogram.get("ts"), Some(&2));
        assert_eq!(result.extension_histogram.get("go"), Some(&1));
    }
}
