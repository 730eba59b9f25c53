//! Workspace Detector (component B).
//!
//! Discovers packages, entry points, and path aliases within a source root.
//! Node/TypeScript detectors run first, Go second; the first to match wins,
//! so a repo carrying both kinds of markers resolves as Node.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use codetrace_core::{PackageManager, WorkspaceKind};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub name: String,
    pub relative_path: String,
    pub version: Option<String>,
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkspaceInfo {
    pub kind: WorkspaceKind,
    pub package_manager: PackageManager,
    pub packages: Vec<PackageInfo>,
    /// package name -> entry-point relative path
    pub alias_map: HashMap<String, String>,
    /// tsconfig alias prefix -> relative path
    pub tsconfig_alias_map: HashMap<String, String>,
}

pub fn detect(root: &Path) -> WorkspaceInfo {
    if let Some(info) = detect_node(root) {
        return info;
    }
    if let Some(info) = detect_go(root) {
        return info;
    }
    fallback_standalone(root)
}

fn fallback_standalone(root: &Path) -> WorkspaceInfo {
    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("package")
        .to_string();
    let mut alias_map = HashMap::new();
    alias_map.insert(name.clone(), ".".to_string());
    WorkspaceInfo {
        kind: WorkspaceKind::Standalone,
        package_manager: PackageManager::Unknown,
        packages: vec![PackageInfo {
            name,
            relative_path: ".".to_string(),
            version: None,
            entry_point: probe_entry_point(root, root),
        }],
        alias_map,
        tsconfig_alias_map: HashMap::new(),
    }
}

// ---------- Node / TypeScript ----------

#[derive(Debug, Deserialize, Default)]
struct PackageJson {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    workspaces: Option<WorkspacesField>,
    source: Option<String>,
    module: Option<String>,
    main: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WorkspacesField {
    List(Vec<String>),
    Object { packages: Vec<String> },
}

#[derive(Debug, Deserialize, Default)]
struct LernaJson {
    packages: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct PnpmWorkspaceYaml {
    packages: Option<Vec<String>>,
}

fn detect_node(root: &Path) -> Option<WorkspaceInfo> {
    let patterns = node_workspace_globs(root)?;
    let manager = infer_node_package_manager(root);
    let packages = expand_package_globs(root, &patterns);

    let mut infos = Vec::new();
    let mut alias_map = HashMap::new();
    for pkg_dir in packages {
        let manifest_path = pkg_dir.join("package.json");
        let manifest: PackageJson = std::fs::read_to_string(&manifest_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        let relative_path = relative(root, &pkg_dir);
        let name = manifest.name.clone().unwrap_or_else(|| relative_path.clone());
        let entry_point = probe_entry_point(root, &pkg_dir).or_else(|| {
            manifest
                .source
                .or(manifest.module)
                .or(manifest.main)
                .map(|p| normalize_rel(&relative_path, &p))
        });

        if let Some(ref ep) = entry_point {
            alias_map.insert(name.clone(), ep.clone());
        }

        infos.push(PackageInfo {
            name,
            relative_path,
            version: manifest.version,
            entry_point,
        });
    }

    let tsconfig_alias_map = parse_tsconfig_paths(root).unwrap_or_default();

    Some(WorkspaceInfo {
        kind: WorkspaceKind::Monorepo,
        package_manager: manager,
        packages: infos,
        alias_map,
        tsconfig_alias_map,
    })
}

/// Returns the workspace glob patterns (with `!`-prefixed negations intact)
/// from whichever marker is present, or `None` if this isn't a Node
/// monorepo.
fn node_workspace_globs(root: &Path) -> Option<Vec<String>> {
    let pnpm_path = root.join("pnpm-workspace.yaml");
    if let Ok(content) = std::fs::read_to_string(&pnpm_path) {
        if let Ok(parsed) = serde_yml::from_str::<PnpmWorkspaceYaml>(&content) {
            if let Some(packages) = parsed.packages {
                return Some(packages);
            }
        }
    }

    let package_json_path = root.join("package.json");
    if let Ok(content) = std::fs::read_to_string(&package_json_path) {
        if let Ok(manifest) = serde_json::from_str::<PackageJson>(&content) {
            match manifest.workspaces {
                Some(WorkspacesField::List(globs)) => return Some(globs),
                Some(WorkspacesField::Object { packages }) => return Some(packages),
                None => {}
            }
        }
    }

    let lerna_path = root.join("lerna.json");
    if let Ok(content) = std::fs::read_to_string(&lerna_path) {
        if let Ok(parsed) = serde_json::from_str::<LernaJson>(&content) {
            if let Some(packages) = parsed.packages {
                return Some(packages);
            }
        }
    }

    None
}

fn infer_node_package_manager(root: &Path) -> PackageManager {
    if root.join("pnpm-lock.yaml").exists() {
        PackageManager::Pnpm
    } else if root.join("yarn.lock").exists() {
        PackageManager::Yarn
    } else if root.join("lerna.json").exists() {
        PackageManager::Lerna
    } else if root.join("package-lock.json").exists() {
        PackageManager::Npm
    } else {
        PackageManager::Npm
    }
}

/// Expand positive globs and subtract `!`-prefixed negation patterns,
/// returning absolute directories that contain a `package.json`.
fn expand_package_globs(root: &Path, patterns: &[String]) -> Vec<PathBuf> {
    let mut positive = Vec::new();
    let mut negative = Vec::new();
    for pattern in patterns {
        if let Some(stripped) = pattern.strip_prefix('!') {
            negative.push(stripped.to_string());
        } else {
            positive.push(pattern.clone());
        }
    }

    let mut matched = Vec::new();
    for pattern in &positive {
        let full_pattern = root.join(pattern);
        let Some(pattern_str) = full_pattern.to_str() else { continue };
        let Ok(paths) = glob::glob(pattern_str) else { continue };
        for entry in paths.flatten() {
            if entry.is_dir() && entry.join("package.json").exists() {
                matched.push(entry);
            }
        }
    }

    if negative.is_empty() {
        return matched;
    }

    let mut excluded = Vec::new();
    for pattern in &negative {
        let full_pattern = root.join(pattern);
        let Some(pattern_str) = full_pattern.to_str() else { continue };
        if let Ok(paths) = glob::glob(pattern_str) {
            excluded.extend(paths.flatten());
        }
    }

    matched.into_iter().filter(|p| !excluded.contains(p)).collect()
}

fn probe_entry_point(root: &Path, pkg_dir: &Path) -> Option<String> {
    for candidate in [
        "src/index.ts",
        "src/index.tsx",
        "src/index.js",
        "src/index.jsx",
        "index.ts",
        "index.tsx",
        "index.js",
        "index.jsx",
    ] {
        if pkg_dir.join(candidate).exists() {
            return Some(normalize_rel(&relative(root, pkg_dir), candidate));
        }
    }
    None
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn normalize_rel(pkg_relative: &str, file: &str) -> String {
    if pkg_relative == "." {
        file.to_string()
    } else {
        format!("{pkg_relative}/{file}")
    }
}

/// Strip `//` and `/* */` comments from a tsconfig.json-ish JSON-with-
/// comments document with a small state machine that respects string
/// literals, then parse as plain JSON.
fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            other => out.push(other),
        }
    }

    out
}

#[derive(Debug, Deserialize, Default)]
struct TsConfig {
    extends: Option<String>,
    #[serde(rename = "compilerOptions")]
    compiler_options: Option<CompilerOptions>,
}

#[derive(Debug, Deserialize, Default)]
struct CompilerOptions {
    #[serde(rename = "baseUrl")]
    base_url: Option<String>,
    paths: Option<HashMap<String, Vec<String>>>,
}

const MAX_EXTENDS_DEPTH: usize = 10;

fn parse_tsconfig_paths(root: &Path) -> Option<HashMap<String, String>> {
    let tsconfig_path = root.join("tsconfig.json");
    if !tsconfig_path.exists() {
        return None;
    }
    let mut map = HashMap::new();
    load_tsconfig_chain(root, &tsconfig_path, &mut map, 0);
    Some(map)
}

fn load_tsconfig_chain(
    root: &Path,
    path: &Path,
    map: &mut HashMap<String, String>,
    depth: usize,
) {
    if depth >= MAX_EXTENDS_DEPTH {
        return;
    }
    let Ok(content) = std::fs::read_to_string(path) else { return };
    let stripped = strip_jsonc_comments(&content);
    let Ok(config) = serde_json::from_str::<TsConfig>(&stripped) else { return };

    // Base config (extends target) is loaded first so the child's paths
    // override on conflict — matches "root wins on conflict" for per-package
    // tsconfigs merging into the root map, applied generally here too.
    if let Some(extends) = &config.extends {
        let parent_dir = path.parent().unwrap_or(root);
        let extends_path = parent_dir.join(extends);
        load_tsconfig_chain(root, &extends_path, map, depth + 1);
    }

    if let Some(opts) = config.compiler_options {
        let base_url = opts.base_url.unwrap_or_else(|| ".".to_string());
        let config_dir = path.parent().unwrap_or(root);
        let base_dir = config_dir.join(&base_url);
        if let Some(paths) = opts.paths {
            for (alias, targets) in paths {
                let Some(first) = targets.first() else { continue };
                let alias_key = alias.trim_end_matches("/*").to_string();
                let target_rel = first.trim_end_matches("/*");
                let resolved = base_dir.join(target_rel);
                let reroot = relative(root, &resolved);
                map.insert(alias_key, reroot);
            }
        }
    }
}

// ---------- Go ----------

fn detect_go(root: &Path) -> Option<WorkspaceInfo> {
    let go_work = root.join("go.work");
    if go_work.exists() {
        return detect_go_workspace(root, &go_work);
    }
    let go_mod = root.join("go.mod");
    if go_mod.exists() {
        return detect_go_standalone(root, &go_mod);
    }
    None
}

fn detect_go_workspace(root: &Path, go_work: &Path) -> Option<WorkspaceInfo> {
    let content = std::fs::read_to_string(go_work).ok()?;
    let use_dirs = parse_go_use_directives(&content);

    let mut packages = Vec::new();
    let mut alias_map = HashMap::new();

    for use_dir in use_dirs {
        let module_root = root.join(&use_dir);
        let module_path = read_go_mod_module_path(&module_root.join("go.mod"));
        for dir in walk_go_packages(&module_root) {
            let relative_path = relative(root, &dir);
            let sub = relative(&module_root, &dir);
            let import_path = match (&module_path, sub.as_str()) {
                (Some(m), ".") => m.clone(),
                (Some(m), s) => format!("{m}/{s}"),
                (None, _) => relative_path.clone(),
            };
            let entry_point = if dir.join("main.go").exists() {
                Some(normalize_rel(&relative_path, "main.go"))
            } else {
                None
            };
            if let Some(ref ep) = entry_point {
                alias_map.insert(import_path.clone(), ep.clone());
            }
            packages.push(PackageInfo {
                name: import_path,
                relative_path,
                version: None,
                entry_point,
            });
        }
    }

    Some(WorkspaceInfo {
        kind: WorkspaceKind::GoWorkspace,
        package_manager: PackageManager::Go,
        packages,
        alias_map,
        tsconfig_alias_map: HashMap::new(),
    })
}

fn detect_go_standalone(root: &Path, go_mod: &Path) -> Option<WorkspaceInfo> {
    let module_path = read_go_mod_module_path(go_mod)?;
    let mut packages = Vec::new();
    let mut alias_map = HashMap::new();

    for dir in walk_go_packages(root) {
        let relative_path = relative(root, &dir);
        let import_path = if relative_path == "." {
            module_path.clone()
        } else {
            format!("{module_path}/{relative_path}")
        };
        let entry_point = if dir.join("main.go").exists() {
            Some(normalize_rel(&relative_path, "main.go"))
        } else {
            None
        };
        if let Some(ref ep) = entry_point {
            alias_map.insert(import_path.clone(), ep.clone());
        }
        packages.push(PackageInfo {
            name: import_path,
            relative_path,
            version: None,
            entry_point,
        });
    }

    Some(WorkspaceInfo {
        kind: WorkspaceKind::Standalone,
        package_manager: PackageManager::Go,
        packages,
        alias_map,
        tsconfig_alias_map: HashMap::new(),
    })
}

fn parse_go_use_directives(content: &str) -> Vec<String> {
    let mut uses = Vec::new();
    let mut in_block = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("use (") {
            in_block = true;
            continue;
        }
        if in_block {
            if trimmed == ")" {
                in_block = false;
                continue;
            }
            uses.push(trimmed.trim_start_matches("./").to_string());
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("use ") {
            uses.push(rest.trim().trim_start_matches("./").to_string());
        }
    }
    uses.into_iter().filter(|s| !s.is_empty()).collect()
}

fn read_go_mod_module_path(go_mod: &Path) -> Option<String> {
    let content = std::fs::read_to_string(go_mod).ok()?;
    content.lines().find_map(|line| {
        line.trim()
            .strip_prefix("module ")
            .map(|m| m.trim().to_string())
    })
}

/// Every directory under `root` containing at least one `.go` file, skipping
/// `vendor`, `testdata`, and hidden directories.
fn walk_go_packages(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    walk_go_packages_rec(root, root, &mut found);
    found
}

fn walk_go_packages_rec(root: &Path, dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    let mut has_go_file = false;
    let mut subdirs = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name == "vendor" || name == "testdata" || name.starts_with('.') {
                continue;
            }
            subdirs.push(path);
        } else if path.extension().and_then(|e| e.to_str()) == Some("go") {
            has_go_file = true;
        }
    }

    if has_go_file {
        found.push(dir.to_path_buf());
    }
    for sub in subdirs {
        walk_go_packages_rec(root, &sub, found);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn pnpm_monorepo_with_negation_excludes_deprecated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("pnpm-workspace.yaml"),
            "packages:\n  - 'packages/*'\n  - '!packages/deprecated-*'\n",
        )
        .unwrap();
        fs::write(dir.path().join("pnpm-lock.yaml"), "").unwrap();

        fs::create_dir_all(dir.path().join("packages/keep")).unwrap();
        fs::write(
            dir.path().join("packages/keep/package.json"),
            r#"{"name": "@test/keep"}"#,
        )
        .unwrap();

        fs::create_dir_all(dir.path().join("packages/deprecated-old")).unwrap();
        fs::write(
            dir.path().join("packages/deprecated-old/package.json"),
            r#"{"name": "@test/deprecated-old"}"#,
        )
        .unwrap();

        let info = detect(dir.path());
        assert_eq!(info.kind, WorkspaceKind::Monorepo);
        assert_eq!(info.package_manager, PackageManager::Pnpm);
        let names: Vec<_> = info.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["@test/keep"]);
    }

    #[test]
    fn go_workspace_discovers_modules_and_excludes_vendor() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("go.work"),
            "go 1.21\n\nuse (\n\t./cmd/api\n\t./pkg/shared\n)\n",
        )
        .unwrap();

        fs::create_dir_all(dir.path().join("cmd/api")).unwrap();
        fs::write(dir.path().join("cmd/api/go.mod"), "module example.com/cmd/api\n").unwrap();
        fs::write(dir.path().join("cmd/api/main.go"), "package main\n").unwrap();

        fs::create_dir_all(dir.path().join("pkg/shared")).unwrap();
        fs::write(dir.path().join("pkg/shared/go.mod"), "module example.com/pkg/shared\n").unwrap();
        fs::write(dir.path().join("pkg/shared/lib.go"), "package shared\n").unwrap();

        fs::create_dir_all(dir.path().join("cmd/api/vendor/other")).unwrap();
        fs::write(dir.path().join("cmd/api/vendor/other/x.go"), "package other\n").unwrap();

        let info = detect(dir.path());
        assert_eq!(info.kind, WorkspaceKind::GoWorkspace);
        assert_eq!(info.packages.len(), 2);
        let api = info.packages.iter().find(|p| p.relative_path == "cmd/api").unwrap();
        assert_eq!(api.entry_point.as_deref(), Some("cmd/api/main.go"));
    }

    #[test]
    fn mixed_repo_node_wins_over_go() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"name": "root", "workspaces": ["packages/*"]}"#).unwrap();
        fs::create_dir_all(dir.path().join("packages/a")).unwrap();
        fs::write(dir.path().join("packages/a/package.json"), r#"{"name": "a"}"#).unwrap();
        fs::write(dir.path().join("go.mod"), "module example.com/mixed\n").unwrap();

        let info = detect(dir.path());
        assert_eq!(info.kind, WorkspaceKind::Monorepo);
    }

    #[test]
    fn strip_jsonc_comments_respects_strings() {
        let input = r#"{
  // line comment
  "a": "http://not-a-comment",
  /* block
     comment */
  "b": 1
}"#;
        let stripped = strip_jsonc_comments(input);
        let parsed: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(parsed["a"], "http://not-a-comment");
        assert_eq!(parsed["b"], 1);
    }

    #[test]
    fn no_markers_falls_back_to_standalone() {
        let dir = tempfile::tempdir().unwrap();
        let info = detect(dir.path());
        assert_eq!(info.kind, WorkspaceKind::Standalone);
        assert_eq!(info.packages.len(), 1);
    }
}
