use crate::collector::WalkOptions;
use crate::diff::DiffJob;
use crate::error::PackerError;
use crate::pack::DirectoryJob;
use crate::patterns::PatternSet;
use crate::profiles::ProfileManager;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = ".codepacker.toml";
pub const LEGACY_CONFIG_PATH: &str = ".vscode/code-packer.json";

pub const DEFAULT_EXCLUSIONS: &[&str] = &["node_modules", "dist", "out", "target", "build"];
pub const DEFAULT_MAX_FILE_SIZE_KB: u64 = 1024;

/// The `[diff]` table of a configuration layer.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct DiffLayer {
    #[serde(alias = "sourceBranch")]
    pub source_branch: Option<String>,
    #[serde(alias = "targetBranch")]
    pub target_branch: Option<String>,
    #[serde(alias = "outputFile")]
    pub output_file: Option<PathBuf>,
    #[serde(alias = "includeBinaryFiles")]
    pub include_binary_files: Option<bool>,
    #[serde(alias = "includeMetaFiles")]
    pub include_meta_files: Option<bool>,
    #[serde(alias = "maxFileSizeKB")]
    pub max_file_size_kb: Option<u64>,
}

impl DiffLayer {
    pub fn overlay(self, higher: DiffLayer) -> DiffLayer {
        DiffLayer {
            source_branch: higher.source_branch.or(self.source_branch),
            target_branch: higher.target_branch.or(self.target_branch),
            output_file: higher.output_file.or(self.output_file),
            include_binary_files: higher.include_binary_files.or(self.include_binary_files),
            include_meta_files: higher.include_meta_files.or(self.include_meta_files),
            max_file_size_kb: higher.max_file_size_kb.or(self.max_file_size_kb),
        }
    }
}

/// One layer of configuration. Every field is optional so layers can be
/// stacked with [`ConfigLayer::overlay`]. Accepts the snake_case keys of
/// `.codepacker.toml` and the camelCase keys of the legacy JSON file.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct ConfigLayer {
    pub profile: Option<String>,
    #[serde(alias = "sourceDirectory")]
    pub source_directory: Option<PathBuf>,
    #[serde(alias = "outputFile")]
    pub output_file: Option<PathBuf>,
    #[serde(alias = "exclusionPatterns")]
    pub exclusion_patterns: Option<Vec<String>>,
    #[serde(alias = "inclusionPatterns")]
    pub inclusion_patterns: Option<Vec<String>>,
    pub debug: Option<bool>,
    #[serde(alias = "respectGitignore")]
    pub respect_gitignore: Option<bool>,
    #[serde(alias = "followSymlinks")]
    pub follow_symlinks: Option<bool>,
    pub diff: Option<DiffLayer>,

    // Custom profiles section: [profiles.my-profile]
    pub profiles: Option<HashMap<String, CustomProfile>>,
}

/// Represents a custom profile definition within the config file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CustomProfile {
    pub description: Option<String>,
    /// The name of the profile this one extends (a built-in or another custom one)
    #[serde(alias = "profile")]
    pub extends: Option<String>,
    pub inclusion_patterns: Option<Vec<String>>,
    pub exclusion_patterns: Option<Vec<String>>,
}

impl ConfigLayer {
    /// Built-in defaults for a workspace.
    pub fn builtin(workspace_root: &Path) -> ConfigLayer {
        ConfigLayer {
            source_directory: Some(PathBuf::from(".")),
            output_file: Some(PathBuf::from(format!(
                "{}_packed_code.txt",
                safe_project_name(workspace_root)
            ))),
            exclusion_patterns: Some(DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect()),
            inclusion_patterns: Some(Vec::new()),
            debug: Some(false),
            respect_gitignore: Some(false),
            follow_symlinks: Some(false),
            diff: Some(DiffLayer {
                include_binary_files: Some(false),
                include_meta_files: Some(false),
                max_file_size_kb: Some(DEFAULT_MAX_FILE_SIZE_KB),
                ..DiffLayer::default()
            }),
            ..ConfigLayer::default()
        }
    }

    /// Returns `self` with every value that `higher` sets replaced by it.
    /// Custom profiles are merged by name, `higher` winning on conflicts.
    pub fn overlay(self, higher: ConfigLayer) -> ConfigLayer {
        let diff = match (self.diff, higher.diff) {
            (Some(lower), Some(higher)) => Some(lower.overlay(higher)),
            (lower, higher) => higher.or(lower),
        };
        let profiles = match (self.profiles, higher.profiles) {
            (Some(mut lower), Some(higher)) => {
                lower.extend(higher);
                Some(lower)
            }
            (lower, higher) => higher.or(lower),
        };

        ConfigLayer {
            profile: higher.profile.or(self.profile),
            source_directory: higher.source_directory.or(self.source_directory),
            output_file: higher.output_file.or(self.output_file),
            exclusion_patterns: higher.exclusion_patterns.or(self.exclusion_patterns),
            inclusion_patterns: higher.inclusion_patterns.or(self.inclusion_patterns),
            debug: higher.debug.or(self.debug),
            respect_gitignore: higher.respect_gitignore.or(self.respect_gitignore),
            follow_symlinks: higher.follow_symlinks.or(self.follow_symlinks),
            diff,
            profiles,
        }
    }

    /// Resolves relative paths against `workspace_root` and expands the
    /// selected profile into the pattern set.
    pub fn resolve(self, workspace_root: &Path) -> Result<ResolvedConfig, PackerError> {
        let source_directory = self
            .source_directory
            .ok_or_else(|| PackerError::ConfigurationMissing("source_directory".to_string()))?;
        let output_file = self
            .output_file
            .ok_or_else(|| PackerError::ConfigurationMissing("output_file".to_string()))?;

        let mut exclusions = Vec::new();
        let mut inclusions = Vec::new();
        let profiles = ProfileManager::new(self.profiles.clone());
        if let Some(name) = &self.profile {
            let profile = profiles
                .resolve(name)
                .ok_or_else(|| PackerError::ConfigInvalid(format!("unknown profile '{}'", name)))?;
            debug!("Using '{}' profile: {}", name, profile.description);
            exclusions = profile.exclusion_patterns;
            inclusions = profile.inclusion_patterns;
        }
        extend_unique(&mut exclusions, self.exclusion_patterns.unwrap_or_default());
        extend_unique(&mut inclusions, self.inclusion_patterns.unwrap_or_default());

        let diff = self.diff.unwrap_or_default();
        Ok(ResolvedConfig {
            workspace_root: workspace_root.to_path_buf(),
            source_directory: workspace_root.join(source_directory),
            output_file: workspace_root.join(output_file),
            patterns: PatternSet::new(exclusions, inclusions),
            profile: self.profile,
            debug: self.debug.unwrap_or(false),
            respect_gitignore: self.respect_gitignore.unwrap_or(false),
            follow_symlinks: self.follow_symlinks.unwrap_or(false),
            diff: ResolvedDiff {
                source_branch: diff.source_branch,
                target_branch: diff.target_branch,
                output_file: diff.output_file.map(|p| workspace_root.join(p)),
                include_binary_files: diff.include_binary_files.unwrap_or(false),
                include_meta_files: diff.include_meta_files.unwrap_or(false),
                max_file_size_kb: diff.max_file_size_kb.unwrap_or(DEFAULT_MAX_FILE_SIZE_KB),
            },
            custom_profiles: self.profiles.unwrap_or_default(),
        })
    }
}

fn extend_unique(into: &mut Vec<String>, from: Vec<String>) {
    for pattern in from {
        if !pattern.trim().is_empty() && !into.contains(&pattern) {
            into.push(pattern);
        }
    }
}

/// Merges the three configuration layers. Precedence, highest first:
/// user (config file plus command-line flags), call site, built-in default.
pub fn merge(default: ConfigLayer, call_site: ConfigLayer, user: ConfigLayer) -> ConfigLayer {
    default.overlay(call_site).overlay(user)
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedDiff {
    pub source_branch: Option<String>,
    pub target_branch: Option<String>,
    pub output_file: Option<PathBuf>,
    pub include_binary_files: bool,
    pub include_meta_files: bool,
    pub max_file_size_kb: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub workspace_root: PathBuf,
    pub source_directory: PathBuf,
    pub output_file: PathBuf,
    pub patterns: PatternSet,
    pub profile: Option<String>,
    pub debug: bool,
    pub respect_gitignore: bool,
    pub follow_symlinks: bool,
    pub diff: ResolvedDiff,
    #[serde(skip)]
    pub custom_profiles: HashMap<String, CustomProfile>,
}

impl ResolvedConfig {
    pub fn directory_job(&self) -> DirectoryJob {
        DirectoryJob {
            source_directory: self.source_directory.clone(),
            output_file: self.output_file.clone(),
            patterns: self.patterns.clone(),
            walk: WalkOptions {
                respect_gitignore: self.respect_gitignore,
                follow_symlinks: self.follow_symlinks,
            },
        }
    }

    pub fn diff_job(&self) -> Result<DiffJob, PackerError> {
        let source_branch = self
            .diff
            .source_branch
            .clone()
            .ok_or_else(|| PackerError::ConfigurationMissing("diff source branch".to_string()))?;
        let target_branch = self
            .diff
            .target_branch
            .clone()
            .ok_or_else(|| PackerError::ConfigurationMissing("diff target branch".to_string()))?;
        let output_file = self.diff.output_file.clone().unwrap_or_else(|| {
            self.workspace_root
                .join(default_diff_output(&source_branch, &target_branch))
        });

        Ok(DiffJob {
            source_branch,
            target_branch,
            output_file,
            patterns: self.patterns.clone(),
            include_binary_files: self.diff.include_binary_files,
            include_meta_files: self.diff.include_meta_files,
            max_file_size_kb: self.diff.max_file_size_kb,
        })
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Workspace directory name reduced to `[a-z0-9_]`.
pub fn safe_project_name(workspace_root: &Path) -> String {
    let name = workspace_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    sanitize(&name).to_lowercase()
}

pub fn default_diff_output(source_branch: &str, target_branch: &str) -> String {
    format!("diff_{}_{}.txt", sanitize(source_branch), sanitize(target_branch))
}

fn parse_config(path: &Path, content: &str) -> Result<ConfigLayer> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    } else {
        toml::from_str(content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Loads the user configuration: the given path, or `.codepacker.toml` in the
/// workspace root, or the legacy `.vscode/code-packer.json`.
pub fn load_config(config_path: &Option<PathBuf>, workspace_root: &Path) -> Result<Option<ConfigLayer>> {
    if let Some(p) = config_path {
        let path = workspace_root.join(p);
        if !path.exists() {
            anyhow::bail!("Configuration file not found at: {}", path.display());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        return parse_config(&path, &content).map(Some);
    }

    for candidate in [CONFIG_FILE_NAME, LEGACY_CONFIG_PATH] {
        let path = workspace_root.join(candidate);
        if path.exists() {
            debug!("Loading configuration from {}", path.display());
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            return parse_config(&path, &content).map(Some);
        }
    }

    debug!("No config file found, using default settings");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(output: &str) -> ConfigLayer {
        ConfigLayer {
            output_file: Some(PathBuf::from(output)),
            ..ConfigLayer::default()
        }
    }

    #[test]
    fn user_beats_call_site_beats_default() {
        let root = Path::new("/work/My Project");
        let default = ConfigLayer::builtin(root);

        let merged = merge(default.clone(), layer("call.txt"), ConfigLayer::default());
        assert_eq!(merged.output_file, Some(PathBuf::from("call.txt")));

        let merged = merge(default.clone(), layer("call.txt"), layer("user.txt"));
        assert_eq!(merged.output_file, Some(PathBuf::from("user.txt")));

        let merged = merge(default, ConfigLayer::default(), ConfigLayer::default());
        assert_eq!(merged.output_file, Some(PathBuf::from("my_project_packed_code.txt")));
        assert_eq!(merged.diff.unwrap().max_file_size_kb, Some(DEFAULT_MAX_FILE_SIZE_KB));
    }

    #[test]
    fn diff_tables_merge_field_by_field() {
        let lower = ConfigLayer {
            diff: Some(DiffLayer {
                source_branch: Some("main".into()),
                max_file_size_kb: Some(10),
                ..DiffLayer::default()
            }),
            ..ConfigLayer::default()
        };
        let higher = ConfigLayer {
            diff: Some(DiffLayer {
                target_branch: Some("feature".into()),
                max_file_size_kb: Some(20),
                ..DiffLayer::default()
            }),
            ..ConfigLayer::default()
        };
        let diff = lower.overlay(higher).diff.unwrap();
        assert_eq!(diff.source_branch.as_deref(), Some("main"));
        assert_eq!(diff.target_branch.as_deref(), Some("feature"));
        assert_eq!(diff.max_file_size_kb, Some(20));
    }

    #[test]
    fn toml_config_with_profile_resolves_patterns() {
        let toml = r#"
profile = "docs"
exclusion_patterns = ["drafts"]
inclusion_patterns = ["*.txt"]

[diff]
source_branch = "main"
target_branch = "release/1.0"
max_file_size_kb = 64

[profiles.docs]
extends = "rust"
inclusion_patterns = ["*.adoc"]
"#;
        let user = parse_config(Path::new(".codepacker.toml"), toml).unwrap();
        let root = Path::new("/ws");
        let resolved = merge(ConfigLayer::builtin(root), ConfigLayer::default(), user)
            .resolve(root)
            .unwrap();

        assert_eq!(resolved.patterns.exclusions, vec!["target", "drafts"]);
        assert_eq!(
            resolved.patterns.inclusions,
            vec!["*.rs", "*.toml", "*.md", "Cargo.lock", "*.adoc", "*.txt"]
        );
        assert_eq!(resolved.output_file, PathBuf::from("/ws/ws_packed_code.txt"));

        let job = resolved.diff_job().unwrap();
        assert_eq!(job.max_file_size_kb, 64);
        assert_eq!(job.output_file, PathBuf::from("/ws/diff_main_release_1_0.txt"));
    }

    #[test]
    fn legacy_json_keys_are_accepted() {
        let json = r#"{
  "sourceDirectory": "src",
  "outputFile": "packed.txt",
  "exclusionPatterns": ["*.log"],
  "inclusionPatterns": [],
  "debug": true
}"#;
        let layer = parse_config(Path::new("code-packer.json"), json).unwrap();
        assert_eq!(layer.source_directory, Some(PathBuf::from("src")));
        assert_eq!(layer.exclusion_patterns, Some(vec!["*.log".to_string()]));
        assert_eq!(layer.debug, Some(true));
    }

    #[test]
    fn unknown_profile_and_missing_branches_are_reported() {
        let root = Path::new("/ws");
        let user = ConfigLayer {
            profile: Some("nope".into()),
            ..ConfigLayer::default()
        };
        let err = merge(ConfigLayer::builtin(root), ConfigLayer::default(), user)
            .resolve(root)
            .unwrap_err();
        assert!(matches!(err, PackerError::ConfigInvalid(_)));

        let resolved = ConfigLayer::builtin(root).resolve(root).unwrap();
        assert!(matches!(
            resolved.diff_job(),
            Err(PackerError::ConfigurationMissing(_))
        ));
    }

    #[test]
    fn load_prefers_toml_over_legacy_json() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        assert!(load_config(&None, root).unwrap().is_none());

        fs::create_dir_all(root.join(".vscode")).unwrap();
        fs::write(root.join(LEGACY_CONFIG_PATH), r#"{"outputFile": "legacy.txt"}"#).unwrap();
        let loaded = load_config(&None, root).unwrap().unwrap();
        assert_eq!(loaded.output_file, Some(PathBuf::from("legacy.txt")));

        fs::write(root.join(CONFIG_FILE_NAME), "output_file = \"modern.txt\"\n").unwrap();
        let loaded = load_config(&None, root).unwrap().unwrap();
        assert_eq!(loaded.output_file, Some(PathBuf::from("modern.txt")));

        assert!(load_config(&Some(PathBuf::from("missing.toml")), root).is_err());
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(safe_project_name(Path::new("/x/Code-Packer.v2")), "code_packer_v2");
        assert_eq!(default_diff_output("origin/main", "feat-1"), "diff_origin_main_feat_1.txt");
    }
}
