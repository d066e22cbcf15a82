//! Named include/exclude pattern sets.
//!
//! The registry is owned by the runtime instance; built-in presets seed it
//! and user presets can be registered at runtime or persisted through the
//! catalog's preset store.

use std::collections::HashMap;

use stratafs_model::{FsError, FsResult};

use crate::catalog::{PresetRecord, PresetStore};
use crate::sparse::glob::GlobPattern;
use crate::sparse::matcher::SparseMatcher;

const BUILTIN_PRESETS: &[(&str, &[&str], &[&str])] = &[
    (
        "typescript",
        &["**/*.ts", "**/*.tsx", "**/tsconfig*.json"],
        &["**/node_modules/**", "**/dist/**", "**/*.d.ts"],
    ),
    (
        "javascript",
        &["**/*.js", "**/*.jsx", "**/*.mjs", "**/package.json"],
        &["**/node_modules/**", "**/dist/**"],
    ),
    (
        "source",
        &["src/**", "lib/**"],
        &["**/node_modules/**", "**/target/**", "**/dist/**"],
    ),
    (
        "web",
        &["**/*.html", "**/*.css", "**/*.{js,ts}", "public/**"],
        &["**/node_modules/**"],
    ),
    (
        "config",
        &["*.json", "*.toml", "*.yaml", "*.yml", ".*rc", "config/**"],
        &[],
    ),
    (
        "docs",
        &["**/*.md", "docs/**"],
        &["**/node_modules/**"],
    ),
    (
        "rust",
        &["**/*.rs", "**/Cargo.toml", "**/Cargo.lock"],
        &["**/target/**"],
    ),
];

/// One named preset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub name: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// Registry of presets available to sparse views.
#[derive(Debug, Clone)]
pub struct PresetRegistry {
    presets: HashMap<String, Preset>,
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetRegistry {
    /// Registry seeded with the built-in presets.
    pub fn builtin() -> Self {
        let mut presets = HashMap::new();
        for (name, include, exclude) in BUILTIN_PRESETS {
            presets.insert(
                (*name).to_string(),
                Preset {
                    name: (*name).to_string(),
                    include: include.iter().map(|s| (*s).to_string()).collect(),
                    exclude: exclude.iter().map(|s| (*s).to_string()).collect(),
                },
            );
        }
        Self { presets }
    }

    /// Empty registry, for callers that want full control.
    pub fn empty() -> Self {
        Self {
            presets: HashMap::new(),
        }
    }

    /// Register (or replace) a preset. Empty names, empty include lists, and
    /// malformed patterns are rejected with `EINVAL`.
    pub fn register(
        &mut self,
        name: &str,
        include: Vec<String>,
        exclude: Vec<String>,
    ) -> FsResult<()> {
        if name.trim().is_empty() {
            return Err(FsError::invalid_argument("preset name cannot be empty"));
        }
        if include.is_empty() {
            return Err(FsError::invalid_argument(format!(
                "preset {name} needs at least one include pattern"
            )));
        }
        for pattern in include.iter().chain(exclude.iter()) {
            GlobPattern::compile(pattern)?;
        }
        self.presets.insert(
            name.to_string(),
            Preset {
                name: name.to_string(),
                include,
                exclude,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.presets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build a pattern-mode matcher from a named preset.
    pub fn matcher(&self, name: &str) -> FsResult<SparseMatcher> {
        let preset = self
            .get(name)
            .ok_or_else(|| FsError::invalid_argument(format!("unknown preset: {name}")))?;
        SparseMatcher::patterns(preset.include.iter(), preset.exclude.iter())
    }

    /// Merge persisted presets over the built-in set.
    pub async fn load_persisted(&mut self, store: &PresetStore) -> FsResult<()> {
        for record in store.list().await? {
            self.presets.insert(
                record.name.clone(),
                Preset {
                    name: record.name,
                    include: record.include,
                    exclude: record.exclude,
                },
            );
        }
        Ok(())
    }

    /// Persist one registered preset.
    pub async fn persist(&self, store: &PresetStore, name: &str) -> FsResult<()> {
        let preset = self
            .get(name)
            .ok_or_else(|| FsError::invalid_argument(format!("unknown preset: {name}")))?;
        store
            .save(&PresetRecord {
                name: preset.name.clone(),
                include: preset.include.clone(),
                exclude: preset.exclude.clone(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratafs_model::FsErrorKind;

    #[test]
    fn builtin_presets_compile() {
        let registry = PresetRegistry::builtin();
        for name in registry.names() {
            registry.matcher(name).unwrap();
        }
        assert!(registry.get("typescript").is_some());
    }

    #[test]
    fn typescript_preset_filters_as_expected() {
        let matcher = PresetRegistry::builtin().matcher("typescript").unwrap();
        assert!(matcher.should_include("/src/app.ts"));
        assert!(matcher.should_include("/tsconfig.json"));
        assert!(!matcher.should_include("/src/app.js"));
        assert!(!matcher.should_include("/node_modules/lib/index.ts"));
    }

    #[test]
    fn registering_validates_patterns() {
        let mut registry = PresetRegistry::empty();
        let err = registry
            .register("bad", vec![], vec![])
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::InvalidArgument);

        let err = registry
            .register("worse", vec!["{unbalanced".into()], vec![])
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::InvalidArgument);

        registry
            .register("mine", vec!["app/**".into()], vec!["**/*.tmp".into()])
            .unwrap();
        assert!(registry.matcher("mine").unwrap().should_include("/app/x"));
    }

    #[tokio::test]
    async fn presets_round_trip_through_the_catalog() {
        use crate::catalog::Catalog;
        use crate::tier::{TierLimits, TierRouter};

        let catalog = Catalog::open_in_memory(TierRouter::in_memory(TierLimits::default()))
            .await
            .unwrap();
        let store = catalog.presets();

        let mut registry = PresetRegistry::empty();
        registry
            .register("team", vec!["crates/**".into()], vec!["**/target/**".into()])
            .unwrap();
        registry.persist(&store, "team").await.unwrap();

        let mut fresh = PresetRegistry::builtin();
        fresh.load_persisted(&store).await.unwrap();
        assert_eq!(
            fresh.get("team").unwrap().include,
            vec!["crates/**".to_string()]
        );
    }
}
