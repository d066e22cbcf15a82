//! Glob pattern compilation.
//!
//! Patterns support `*`, `**`, `?`, character classes, and brace expansion.
//! Braces are expanded up front; each alternative is split on `/` and every
//! segment compiles to an anchored per-segment regex, with `**` kept as a
//! zero-or-more-segments wildcard. Segment-level structure is what lets the
//! matcher answer "could a descendant of this directory still match".

use regex::Regex;
use stratafs_model::{FsError, FsResult};

/// Whether `pattern` contains any glob metacharacter.
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

#[derive(Debug, Clone)]
enum Segment {
    /// `**`: matches zero or more whole path segments.
    Any,
    /// Anchored regex over one path segment.
    One(Regex),
}

#[derive(Debug, Clone)]
struct Alternative {
    segments: Vec<Segment>,
}

/// One compiled glob pattern (possibly several brace alternatives).
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    alternatives: Vec<Alternative>,
}

impl GlobPattern {
    pub fn compile(pattern: &str) -> FsResult<Self> {
        if pattern.is_empty() {
            return Err(FsError::invalid_argument("empty glob pattern"));
        }
        let mut alternatives = Vec::new();
        for expanded in expand_braces(pattern)? {
            let mut segments = Vec::new();
            for raw in expanded.trim_matches('/').split('/') {
                if raw.is_empty() {
                    continue;
                }
                if raw == "**" {
                    segments.push(Segment::Any);
                } else {
                    segments.push(Segment::One(segment_regex(raw)?));
                }
            }
            alternatives.push(Alternative { segments });
        }
        Ok(Self {
            source: pattern.to_string(),
            alternatives,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Full match against a root-relative path (no leading `/`).
    pub fn matches(&self, path: &str) -> bool {
        let segs: Vec<&str> = split_path(path);
        self.alternatives
            .iter()
            .any(|alt| match_segments(&alt.segments, &segs))
    }

    /// Whether some strict descendant of `dir` could still match: the
    /// pattern consumes every segment of `dir` and has structure left over.
    /// The root (`""`) is compatible with every non-empty pattern.
    pub fn could_match_under(&self, dir: &str) -> bool {
        let segs: Vec<&str> = split_path(dir);
        self.alternatives
            .iter()
            .any(|alt| prefix_compatible(&alt.segments, &segs))
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

fn match_segments(pattern: &[Segment], segs: &[&str]) -> bool {
    match pattern.first() {
        None => segs.is_empty(),
        Some(Segment::Any) => {
            (0..=segs.len()).any(|taken| match_segments(&pattern[1..], &segs[taken..]))
        }
        Some(Segment::One(re)) => {
            !segs.is_empty() && re.is_match(segs[0]) && match_segments(&pattern[1..], &segs[1..])
        }
    }
}

fn prefix_compatible(pattern: &[Segment], dir_segs: &[&str]) -> bool {
    if dir_segs.is_empty() {
        // A descendant adds at least one more segment, so the pattern must
        // still have something left to consume.
        return !pattern.is_empty();
    }
    match pattern.first() {
        None => false,
        Some(Segment::Any) => true,
        Some(Segment::One(re)) => {
            re.is_match(dir_segs[0]) && prefix_compatible(&pattern[1..], &dir_segs[1..])
        }
    }
}

/// Translate one glob segment (no `/`) into an anchored regex. A `**`
/// embedded inside a segment degrades to `*`.
fn segment_regex(segment: &str) -> FsResult<Regex> {
    let mut out = String::with_capacity(segment.len() + 8);
    out.push('^');
    let mut chars = segment.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                out.push_str("[^/]*");
            }
            '?' => out.push_str("[^/]"),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if matches!(inner, '\\' | '^') {
                        out.push('\\');
                    }
                    out.push(inner);
                }
                if !closed {
                    return Err(FsError::invalid_argument(format!(
                        "unterminated character class in glob segment: {segment}"
                    )));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
        .map_err(|e| FsError::invalid_argument(format!("bad glob segment {segment}: {e}")))
}

/// Expand `{a,b}` alternation (nesting allowed) into plain patterns.
fn expand_braces(pattern: &str) -> FsResult<Vec<String>> {
    let Some(open) = pattern.find('{') else {
        return Ok(vec![pattern.to_string()]);
    };

    let bytes = pattern.as_bytes();
    let mut depth = 0usize;
    let mut close = None;
    let mut splits = Vec::new();
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            b',' if depth == 1 => splits.push(i),
            _ => {}
        }
    }
    let close = close.ok_or_else(|| {
        FsError::invalid_argument(format!("unbalanced braces in glob pattern: {pattern}"))
    })?;

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let body = &pattern[open + 1..close];

    let mut alternatives = Vec::new();
    let mut start = 0usize;
    for &split in &splits {
        alternatives.push(&body[start..split - open - 1]);
        start = split - open;
    }
    alternatives.push(&body[start..]);

    let mut out = Vec::new();
    for alt in alternatives {
        for expanded in expand_braces(&format!("{prefix}{alt}{suffix}"))? {
            out.push(expanded);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(pattern: &str) -> GlobPattern {
        GlobPattern::compile(pattern).unwrap()
    }

    #[test]
    fn star_stays_within_one_segment() {
        let glob = compiled("src/*.ts");
        assert!(glob.matches("src/index.ts"));
        assert!(!glob.matches("src/nested/index.ts"));
        assert!(!glob.matches("lib/index.ts"));
    }

    #[test]
    fn double_star_spans_segments() {
        let glob = compiled("src/**");
        assert!(glob.matches("src/index.ts"));
        assert!(glob.matches("src/a/b/c.ts"));
        assert!(!glob.matches("lib/index.ts"));

        let glob = compiled("**/node_modules/**");
        assert!(glob.matches("node_modules/x/i.js"));
        assert!(glob.matches("a/b/node_modules/y"));
        assert!(!glob.matches("src/modules/y"));
    }

    #[test]
    fn question_mark_and_classes() {
        let glob = compiled("file.?s");
        assert!(glob.matches("file.ts"));
        assert!(glob.matches("file.js"));
        assert!(!glob.matches("file.tsx"));

        let glob = compiled("[abc]*.rs");
        assert!(glob.matches("a_main.rs"));
        assert!(!glob.matches("d_main.rs"));

        let glob = compiled("[!.]*");
        assert!(glob.matches("visible"));
        assert!(!glob.matches(".hidden"));
    }

    #[test]
    fn brace_expansion_covers_alternatives() {
        let glob = compiled("**/*.{ts,tsx}");
        assert!(glob.matches("src/app.ts"));
        assert!(glob.matches("src/app.tsx"));
        assert!(!glob.matches("src/app.js"));

        let glob = compiled("{src,lib}/**");
        assert!(glob.matches("src/x"));
        assert!(glob.matches("lib/y/z"));
        assert!(!glob.matches("bin/x"));
    }

    #[test]
    fn nested_braces_expand_recursively() {
        let glob = compiled("a/{b,c/{d,e}}/f");
        assert!(glob.matches("a/b/f"));
        assert!(glob.matches("a/c/d/f"));
        assert!(glob.matches("a/c/e/f"));
        assert!(!glob.matches("a/c/f"));
    }

    #[test]
    fn unbalanced_braces_are_rejected() {
        assert!(GlobPattern::compile("a/{b,c").is_err());
        assert!(GlobPattern::compile("").is_err());
        assert!(GlobPattern::compile("a/[bc").is_err());
    }

    #[test]
    fn prefix_compatibility_tracks_descendants() {
        let glob = compiled("src/**/*.ts");
        assert!(glob.could_match_under(""));
        assert!(glob.could_match_under("src"));
        assert!(glob.could_match_under("src/deep/deeper"));
        assert!(!glob.could_match_under("lib"));

        // A pattern with nothing left to consume cannot match descendants.
        let glob = compiled("src");
        assert!(glob.could_match_under(""));
        assert!(!glob.could_match_under("src"));
    }

    #[test]
    fn regex_metacharacters_in_literals_are_escaped() {
        let glob = compiled("a+b/c.d");
        assert!(glob.matches("a+b/c.d"));
        assert!(!glob.matches("aab/cxd"));
    }
}
