use crate::config::CustomProfile;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Named pattern preset, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub description: String,
    pub inclusion_patterns: Vec<String>,
    pub exclusion_patterns: Vec<String>,
}

fn push_unique(into: &mut Vec<String>, from: &[String]) {
    for pattern in from {
        if !into.contains(pattern) {
            into.push(pattern.clone());
        }
    }
}

impl Profile {
    pub fn new(
        description: String,
        inclusion_patterns: Vec<String>,
        exclusion_patterns: Vec<String>,
    ) -> Self {
        Self {
            description,
            inclusion_patterns,
            exclusion_patterns,
        }
    }

    /// Merges this profile (parent) with a child. Patterns are additive,
    /// parent first; the child's description wins.
    pub fn merge_with(&self, child: &Profile) -> Profile {
        let mut inclusion_patterns = self.inclusion_patterns.clone();
        let mut exclusion_patterns = self.exclusion_patterns.clone();
        push_unique(&mut inclusion_patterns, &child.inclusion_patterns);
        push_unique(&mut exclusion_patterns, &child.exclusion_patterns);

        Profile {
            description: child.description.clone(),
            inclusion_patterns,
            exclusion_patterns,
        }
    }
}

/// Resolves built-in and user-defined profiles, following `extends` chains.
pub struct ProfileManager {
    built_ins: HashMap<&'static str, Profile>,
    custom_profiles: HashMap<String, CustomProfile>,
}

impl ProfileManager {
    pub fn new(custom_profiles: Option<HashMap<String, CustomProfile>>) -> Self {
        Self {
            built_ins: BUILT_IN_PROFILES.clone(),
            custom_profiles: custom_profiles.unwrap_or_default(),
        }
    }

    /// Custom profiles shadow built-ins of the same name.
    pub fn resolve(&self, name: &str) -> Option<Profile> {
        self.resolve_chain(name, &mut Vec::new())
    }

    fn resolve_chain(&self, name: &str, chain: &mut Vec<String>) -> Option<Profile> {
        if let Some(custom_def) = self.custom_profiles.get(name) {
            chain.push(name.to_string());
            return Some(self.resolve_custom(name, custom_def, chain));
        }
        self.built_ins.get(name).cloned()
    }

    fn resolve_custom(&self, name: &str, custom: &CustomProfile, chain: &mut Vec<String>) -> Profile {
        let child = Profile::new(
            custom.description.clone().unwrap_or_else(|| name.to_string()),
            custom.inclusion_patterns.clone().unwrap_or_default(),
            custom.exclusion_patterns.clone().unwrap_or_default(),
        );

        let Some(parent_name) = &custom.extends else {
            return child;
        };
        debug!("Resolving parent '{}' for custom profile '{}'", parent_name, name);

        if chain.contains(parent_name) {
            warn!(
                "Profile '{}' extends '{}', which forms a cycle. Ignoring parent.",
                name, parent_name
            );
            return child;
        }

        match self.resolve_chain(parent_name, chain) {
            Some(parent) => parent.merge_with(&child),
            None => {
                warn!("Parent profile '{}' not found for '{}'", parent_name, name);
                child
            }
        }
    }

    /// All profile names with their descriptions, sorted by name.
    pub fn list_all(&self) -> Vec<(String, String)> {
        let mut list: Vec<(String, String)> = self
            .built_ins
            .iter()
            .filter(|(name, _)| !self.custom_profiles.contains_key(**name))
            .map(|(name, p)| (name.to_string(), p.description.clone()))
            .collect();

        for (name, custom) in &self.custom_profiles {
            let desc = custom.description.clone().unwrap_or_else(|| match &custom.extends {
                Some(parent) => format!("Custom profile extending '{}'", parent),
                None => "Custom profile".to_string(),
            });
            list.push((name.clone(), desc));
        }

        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }
}

fn patterns(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

static BUILT_IN_PROFILES: Lazy<HashMap<&'static str, Profile>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "nextjs-ts-prisma",
        Profile::new(
            "Next.js, TypeScript, Prisma project files.".to_string(),
            patterns(&[
                "*.ts", "*.tsx", "*.js", "*.jsx", "*.json", "*.css", "*.scss", "*.md",
                "*.prisma", ".env", ".env.local", "next.config.js", "tailwind.config.js",
                "postcss.config.js",
            ]),
            patterns(&["node_modules", ".next", "package-lock.json"]),
        ),
    );
    m.insert(
        "cpp-cmake",
        Profile::new(
            "C/C++ and CMake project files.".to_string(),
            patterns(&[
                "*.c", "*.cpp", "*.cc", "*.h", "*.hpp", "*.cmake", "CMakeLists.txt", "*.md",
            ]),
            patterns(&["build", "cmake-build-*"]),
        ),
    );
    m.insert(
        "rust",
        Profile::new(
            "Rust project files.".to_string(),
            patterns(&["*.rs", "*.toml", "*.md", "Cargo.lock"]),
            patterns(&["target"]),
        ),
    );
    m
});
