//! Name-expression matching for binary filters.
//!
//! An expression has no wildcard glyphs; the dot is the implicit separator.
//! `foo` matches `foo` and every `foo.*` name, `foo.` additionally matches
//! the bare `foo`. Matching is case-insensitive and ignores a trailing binary
//! extension on the candidate name.

/// File extensions stripped from a candidate name before matching.
pub const BINARY_EXTENSIONS: &[&str] = &["exe", "dll", "so", "dylib"];

/// Whether `actual` (a binary or file name) matches `expression`.
///
/// Two rules, checked after lowercasing both sides and stripping a known
/// binary extension from `actual`:
/// - prefix: `actual` starts with `expression` (so `foo` covers `foo.bar`);
/// - exact: `expression` with any trailing `.` trimmed equals `actual`
///   (so `foo.` still covers the bare `foo`).
///
/// An empty expression matches everything; callers guard against that.
pub fn matches(expression: &str, actual: &str) -> bool {
    // 两侧统一小写；候选名先剥掉已知二进制扩展名
    let expr = expression.to_ascii_lowercase();
    let mut name = actual.to_ascii_lowercase();
    for ext in BINARY_EXTENSIONS {
        if let Some(stripped) = name
            .strip_suffix(ext)
            .and_then(|n| n.strip_suffix('.'))
        {
            name = stripped.to_string();
            break;
        }
    }
    name.starts_with(&expr) || expr.trim_end_matches('.') == name
}

/// An owned list of name expressions evaluated as "any matches".
#[derive(Clone, Debug, Default)]
pub struct NameFilter {
    expressions: Vec<String>,
}

impl NameFilter {
    pub fn new<I, S>(expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expressions: expressions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    pub fn add(&mut self, expression: impl Into<String>) {
        self.expressions.push(expression.into());
    }

    /// True if any expression in the filter matches `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.expressions.iter().any(|e| matches(e, name))
    }
}

// (no internal tests here; matching semantics are covered by the integration
// suite)
