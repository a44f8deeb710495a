//! Path pattern matching for walk filtering.
//!
//! Patterns are slash-separated globs. Within a segment `*`, `?` and
//! character classes apply; a `**` segment spans zero or more whole
//! segments. Matching a path reports `(matched, partial)` where `partial`
//! means the pattern has remaining segments and could still match deeper
//! entries, which is what keeps directory traversal alive.

use crate::error::{Result, SyncError};

#[derive(Debug, Clone)]
pub struct Pattern {
    segments: Vec<String>,
    raw: String,
}

impl Pattern {
    pub fn new(pattern: &str) -> Self {
        let trimmed = pattern.trim_end_matches('/');
        Self {
            segments: trimmed.split('/').map(str::to_owned).collect(),
            raw: pattern.to_owned(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> (bool, bool) {
        let parts: Vec<&str> = path.split('/').collect();
        match_from(&self.segments, &parts, 0, 0)
    }
}

fn match_from(pat: &[String], path: &[&str], pi: usize, si: usize) -> (bool, bool) {
    if si == path.len() {
        if pi == pat.len() {
            return (true, false);
        }
        // Remaining pattern segments: the path is a prefix of a possible
        // match. A run of `**` also matches zero further segments.
        let matched = pat[pi..].iter().all(|s| s == "**");
        return (matched, true);
    }
    if pi == pat.len() {
        return (false, false);
    }
    if pat[pi] == "**" {
        let (m_zero, p_zero) = match_from(pat, path, pi + 1, si);
        let (m_more, p_more) = match_from(pat, path, pi, si + 1);
        return (m_zero || m_more, p_zero || p_more);
    }
    if glob_segment(pat[pi].as_bytes(), path[si].as_bytes()) {
        match_from(pat, path, pi + 1, si + 1)
    } else {
        (false, false)
    }
}

/// Single-segment glob match on raw bytes.
fn glob_segment(pat: &[u8], s: &[u8]) -> bool {
    if pat.is_empty() {
        return s.is_empty();
    }
    match pat[0] {
        b'*' => {
            // Greedy star: try every split point.
            for i in 0..=s.len() {
                if glob_segment(&pat[1..], &s[i..]) {
                    return true;
                }
            }
            false
        }
        b'?' => !s.is_empty() && glob_segment(&pat[1..], &s[1..]),
        b'[' => match class_match(pat, s) {
            Some((rest_pat, rest_s)) => glob_segment(rest_pat, rest_s),
            None => false,
        },
        b'\\' if pat.len() > 1 => {
            !s.is_empty() && pat[1] == s[0] && glob_segment(&pat[2..], &s[1..])
        }
        c => !s.is_empty() && c == s[0] && glob_segment(&pat[1..], &s[1..]),
    }
}

/// Matches one character against a `[...]` class. Returns the remaining
/// pattern and string on success.
fn class_match<'a, 'b>(pat: &'a [u8], s: &'b [u8]) -> Option<(&'a [u8], &'b [u8])> {
    let close = pat.iter().skip(1).position(|&b| b == b']')? + 1;
    if s.is_empty() {
        return None;
    }
    let mut class = &pat[1..close];
    let mut negate = false;
    if let Some((&first, rest)) = class.split_first() {
        if first == b'^' || first == b'!' {
            negate = true;
            class = rest;
        }
    }
    let c = s[0];
    let mut hit = false;
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == b'-' {
            if class[i] <= c && c <= class[i + 2] {
                hit = true;
            }
            i += 3;
        } else {
            if class[i] == c {
                hit = true;
            }
            i += 1;
        }
    }
    if hit != negate {
        Some((&pat[close + 1..], &s[1..]))
    } else {
        None
    }
}

#[derive(Debug, Clone)]
struct ExcludeRule {
    pattern: Pattern,
    negate: bool,
}

/// Ordered gitignore-style exclusion set: the last matching rule wins and
/// a leading `!` re-includes. A rule matching a directory also matches
/// everything beneath it.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    rules: Vec<ExcludeRule>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut rules = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let (negate, body) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw.as_str()),
            };
            if body.is_empty() {
                return Err(SyncError::protocol(format!(
                    "empty exclusion pattern {raw:?}"
                )));
            }
            rules.push(ExcludeRule {
                pattern: Pattern::new(body),
                negate,
            });
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `path` is excluded after evaluating all rules in order.
    pub fn excluded(&self, path: &str) -> bool {
        let mut verdict = false;
        for rule in &self.rules {
            if rule_hits(&rule.pattern, path) {
                verdict = !rule.negate;
            }
        }
        verdict
    }

    /// Whether an excluded directory can be pruned outright: true when no
    /// re-include rule could match the directory or anything inside it.
    pub fn prunable(&self, dir: &str) -> bool {
        !self.rules.iter().any(|rule| {
            if !rule.negate {
                return false;
            }
            let (matched, partial) = rule.pattern.matches(dir);
            matched || partial
        })
    }
}

fn rule_hits(pattern: &Pattern, path: &str) -> bool {
    if pattern.matches(path).0 {
        return true;
    }
    // A rule naming a parent directory covers its contents.
    for (i, b) in path.bytes().enumerate() {
        if b == b'/' && pattern.matches(&path[..i]).0 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(pat: &str, path: &str) -> (bool, bool) {
        Pattern::new(pat).matches(path)
    }

    #[test]
    fn literal_and_wildcards() {
        assert_eq!(m("foo", "foo"), (true, false));
        assert_eq!(m("foo", "bar"), (false, false));
        assert_eq!(m("*.go", "fileutils.go"), (true, false));
        assert_eq!(m("f?o", "foo"), (true, false));
        assert_eq!(m("[a-c]ar", "bar"), (true, false));
        assert_eq!(m("[^a-c]ar", "bar"), (false, false));
    }

    #[test]
    fn partial_reports_prefix() {
        assert_eq!(m("bar/foo", "bar"), (false, true));
        assert_eq!(m("b*/foo", "bar"), (false, true));
        assert_eq!(m("bar/g*", "bar/foo"), (false, false));
        assert_eq!(m("bar", "bar/foo"), (false, false));
    }

    #[test]
    fn double_star_spans_segments() {
        assert_eq!(m("**", "a/b/c").0, true);
        assert_eq!(m("a/**", "a/b/c").0, true);
        assert_eq!(m("a/**/d", "a/b/c/d").0, true);
        assert_eq!(m("a/**/d", "a/d").0, true);
        // Zero-or-more: a trailing `**` also matches the anchor itself.
        assert_eq!(m("a/**", "a").0, true);
        // And it matches non-directory leaves.
        assert_eq!(m("a/**", "a/file.txt").0, true);
    }

    #[test]
    fn trailing_slash_is_stripped() {
        assert_eq!(m("b*/", "bar"), (true, false));
    }

    #[test]
    fn exclude_last_match_wins() {
        let set = ExcludeSet::new(&["!fileutils.go".into(), "*.go".into()]).unwrap();
        assert!(set.excluded("fileutils.go"));

        let set = ExcludeSet::new(&["*.go".into(), "!fileutils.go".into()]).unwrap();
        assert!(!set.excluded("fileutils.go"));
    }

    #[test]
    fn exclude_covers_directory_contents() {
        let set = ExcludeSet::new(&["docs".into()]).unwrap();
        assert!(set.excluded("docs"));
        assert!(set.excluded("docs/README.md"));

        let set = ExcludeSet::new(&["docs".into(), "!docs/README.md".into()]).unwrap();
        assert!(!set.excluded("docs/README.md"));
        assert!(set.excluded("docs/other.md"));
    }

    #[test]
    fn prune_blocked_by_reinclude() {
        let set = ExcludeSet::new(&["foo*".into(), "!foo/bar2".into()]).unwrap();
        assert!(set.excluded("foo"));
        assert!(!set.prunable("foo"));
        assert!(set.prunable("foo2"));

        let plain = ExcludeSet::new(&["foo".into()]).unwrap();
        assert!(plain.prunable("foo"));
    }
}
