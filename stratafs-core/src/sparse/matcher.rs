//! Sparse-checkout matching: pattern mode and cone mode.

use stratafs_model::{FsError, FsResult};

use crate::path;
use crate::sparse::glob::{GlobPattern, is_glob};

#[derive(Debug, Clone)]
enum MatchMode {
    /// Classic include/exclude globbing.
    Patterns { include: Vec<GlobPattern> },
    /// Whole-directory cones, no wildcards.
    Cone { cones: Vec<String> },
}

/// Decides which paths a sparse view keeps and which directories are worth
/// walking into. Paths are matched relative to `root` (default `/`).
#[derive(Debug, Clone)]
pub struct SparseMatcher {
    root: String,
    mode: MatchMode,
    exclude: Vec<GlobPattern>,
}

impl SparseMatcher {
    /// Pattern mode. An empty include list means "include everything", so a
    /// matcher can be exclude-only.
    pub fn patterns<I, E, S, T>(include: I, exclude: E) -> FsResult<Self>
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let include = include
            .into_iter()
            .map(|p| GlobPattern::compile(p.as_ref()))
            .collect::<FsResult<Vec<_>>>()?;
        let exclude = compile_excludes(exclude)?;
        Ok(Self {
            root: "/".to_string(),
            mode: MatchMode::Patterns { include },
            exclude,
        })
    }

    /// Cone mode: plain directory paths only. Any wildcard is rejected with
    /// `EINVAL`.
    pub fn cone<I, E, S, T>(dirs: I, exclude: E) -> FsResult<Self>
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut cones = Vec::new();
        for dir in dirs {
            let dir = dir.as_ref();
            if is_glob(dir) {
                return Err(FsError::invalid_argument(format!(
                    "cone patterns cannot contain wildcards: {dir}"
                )));
            }
            let trimmed = dir.trim_matches('/');
            if trimmed.is_empty() {
                return Err(FsError::invalid_argument("empty cone directory"));
            }
            cones.push(trimmed.to_string());
        }
        let exclude = compile_excludes(exclude)?;
        Ok(Self {
            root: "/".to_string(),
            mode: MatchMode::Cone { cones },
            exclude,
        })
    }

    /// Anchor matching below `root` instead of `/`.
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Whether the file or directory at `path` belongs to the sparse view.
    pub fn should_include(&self, path: &str) -> bool {
        let rel = path::relative_to_root(path, &self.root);
        if self.excluded(rel) {
            return false;
        }
        match &self.mode {
            MatchMode::Patterns { include } => {
                include.is_empty() || include.iter().any(|p| p.matches(rel))
            }
            MatchMode::Cone { cones } => cone_includes(cones, rel),
        }
    }

    /// Whether a descendant of directory `path` could still be included.
    pub fn should_traverse_directory(&self, path: &str) -> bool {
        let rel = path::relative_to_root(path, &self.root);
        if self.excluded(rel) {
            return false;
        }
        match &self.mode {
            MatchMode::Patterns { include } => {
                include.is_empty() || include.iter().any(|p| p.could_match_under(rel))
            }
            MatchMode::Cone { cones } => {
                rel.is_empty()
                    || cones.iter().any(|cone| {
                        is_ancestor_of(rel, cone) || within_cone(rel, cone)
                    })
            }
        }
    }

    fn excluded(&self, rel: &str) -> bool {
        !rel.is_empty() && self.exclude.iter().any(|p| p.matches(rel))
    }
}

fn compile_excludes<E, T>(exclude: E) -> FsResult<Vec<GlobPattern>>
where
    E: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    exclude
        .into_iter()
        .map(|p| GlobPattern::compile(p.as_ref()))
        .collect()
}

/// Cone inclusion: root-level entries, immediate children of any ancestor
/// of a cone, and everything inside a cone.
fn cone_includes(cones: &[String], rel: &str) -> bool {
    if rel.is_empty() {
        return true;
    }
    let parent = match rel.rfind('/') {
        Some(idx) => &rel[..idx],
        None => "",
    };
    if parent.is_empty() {
        // Root level.
        return true;
    }
    cones
        .iter()
        .any(|cone| within_cone(rel, cone) || is_ancestor_of(parent, cone))
}

/// `dir` is a proper ancestor of `cone` (`""` is an ancestor of everything).
fn is_ancestor_of(dir: &str, cone: &str) -> bool {
    dir.is_empty() || (cone.len() > dir.len() && cone.starts_with(dir) && cone.as_bytes()[dir.len()] == b'/')
}

/// `rel` equals `cone` or sits at any depth inside it.
fn within_cone(rel: &str, cone: &str) -> bool {
    rel == cone
        || (rel.len() > cone.len() && rel.starts_with(cone) && rel.as_bytes()[cone.len()] == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratafs_model::FsErrorKind;

    #[test]
    fn pattern_mode_includes_and_excludes() {
        let matcher = SparseMatcher::patterns(
            ["src/**", "*.md"],
            ["**/node_modules/**", "src/generated/**"],
        )
        .unwrap();

        assert!(matcher.should_include("/src/index.ts"));
        assert!(matcher.should_include("/README.md"));
        assert!(!matcher.should_include("/lib/index.js"));
        assert!(!matcher.should_include("/src/generated/api.ts"));
        assert!(!matcher.should_include("/src/node_modules/x/i.js"));
    }

    #[test]
    fn empty_include_list_means_everything() {
        let matcher = SparseMatcher::patterns([] as [&str; 0], ["**/*.log"]).unwrap();
        assert!(matcher.should_include("/anything/at/all.rs"));
        assert!(!matcher.should_include("/var/app.log"));
        assert!(matcher.should_traverse_directory("/deep/dir"));
    }

    #[test]
    fn traversal_follows_include_prefixes() {
        let matcher =
            SparseMatcher::patterns(["src/**"], [] as [&str; 0]).unwrap();
        assert!(matcher.should_traverse_directory("/"));
        assert!(matcher.should_traverse_directory("/src"));
        assert!(matcher.should_traverse_directory("/src/deep"));
        assert!(!matcher.should_traverse_directory("/lib"));
    }

    #[test]
    fn include_implies_parent_traversal() {
        let matcher = SparseMatcher::patterns(
            ["src/**/*.ts", "docs/*.md"],
            ["**/dist/**"],
        )
        .unwrap();
        for path in ["/src/a/b/c.ts", "/docs/guide.md", "/src/x.ts"] {
            if matcher.should_include(path) {
                assert!(
                    matcher.should_traverse_directory(path::dirname(path)),
                    "included {path} but parent not traversable"
                );
            }
        }
    }

    #[test]
    fn excluded_directory_is_pruned() {
        let matcher =
            SparseMatcher::patterns(["**/*.js"], ["node_modules"]).unwrap();
        assert!(!matcher.should_traverse_directory("/node_modules"));
        assert!(matcher.should_traverse_directory("/src"));
    }

    #[test]
    fn cone_mode_rejects_wildcards() {
        for bad in ["src/*", "src?", "s[ab]", "{a,b}"] {
            let err = SparseMatcher::cone([bad], [] as [&str; 0]).unwrap_err();
            assert_eq!(err.kind(), FsErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn cone_inclusion_rules() {
        let matcher =
            SparseMatcher::cone(["src/components/ui/"], [] as [&str; 0]).unwrap();

        // Top-level entries always belong to the view.
        assert!(matcher.should_include("/package.json"));
        // Immediate children of a cone ancestor.
        assert!(matcher.should_include("/src/index.ts"));
        assert!(matcher.should_include("/src/components/theme.ts"));
        // Anything inside the cone.
        assert!(matcher.should_include("/src/components/ui/Button.tsx"));
        assert!(matcher.should_include("/src/components/ui/deep/nested.tsx"));
        // Outside the cone and not an ancestor's immediate child.
        assert!(!matcher.should_include("/src/utils/helper.ts"));
    }

    #[test]
    fn cone_traversal_covers_ancestors_and_interior() {
        let matcher = SparseMatcher::cone(["src/components/ui"], [] as [&str; 0]).unwrap();
        assert!(matcher.should_traverse_directory("/"));
        assert!(matcher.should_traverse_directory("/src"));
        assert!(matcher.should_traverse_directory("/src/components"));
        assert!(matcher.should_traverse_directory("/src/components/ui"));
        assert!(matcher.should_traverse_directory("/src/components/ui/deep"));
        assert!(!matcher.should_traverse_directory("/src/utils"));
        assert!(!matcher.should_traverse_directory("/lib"));
    }

    #[test]
    fn cone_mode_still_applies_excludes() {
        let matcher =
            SparseMatcher::cone(["src"], ["src/secret/**", "*.env"]).unwrap();
        assert!(matcher.should_include("/src/app.ts"));
        assert!(!matcher.should_include("/src/secret/key.pem"));
        assert!(!matcher.should_include("/prod.env"));
    }

    #[test]
    fn root_prefix_is_stripped_before_matching() {
        let matcher = SparseMatcher::patterns(["src/**"], [] as [&str; 0])
            .unwrap()
            .with_root("/workspace");
        assert!(matcher.should_include("/workspace/src/main.rs"));
        assert!(!matcher.should_include("/workspace/lib/util.rs"));
    }
}
