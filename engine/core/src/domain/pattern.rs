// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Pattern Matcher / Regex-Rewrite Engine
//!
//! Every matching decision in the policy engine goes through [`PatternEngine`].
//! Two pattern forms are understood:
//!
//! | Form | Example | Behaviour |
//! |------|---------|-----------|
//! | plain | `meet\.` | case-insensitive regex anchored at the start |
//! | rewrite | `/(.*)@old.com/\1@new.com/\d+@new.com/` | search, substitute, final match |
//!
//! The rewrite form is `/search/substitution?/final_match?/`, split on
//! unescaped `/`. The search part is case-insensitive; `final_match` is
//! case-sensitive and anchored at the start. Substitutions use `\1` or
//! `\g<name>` group references.
//!
//! Compiled expressions are kept in a read-mostly cache so the engine can be
//! shared across concurrent decisions.
//!
//! Invalid expressions are authoring errors: in strict mode they surface as
//! [`PatternError`], otherwise they are logged and treated as a non-match.

use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

const MAX_CACHED_PATTERNS: usize = 4096;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Outcome of evaluating one pattern against one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub matched: bool,
    /// Target after substitution; equals the input unless a rewrite applied.
    pub rewritten: String,
}

impl PatternMatch {
    fn unchanged(matched: bool, target: &str) -> Self {
        Self {
            matched,
            rewritten: target.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Flavor {
    /// `(?i)^(?:p)`
    AnchoredInsensitive,
    /// `(?i)p`, used for substitution over the whole target
    Insensitive,
    /// `^(?:p)`
    AnchoredSensitive,
}

impl Flavor {
    fn source(self, pattern: &str) -> String {
        match self {
            Flavor::AnchoredInsensitive => format!("(?i)^(?:{})", pattern),
            Flavor::Insensitive => format!("(?i){}", pattern),
            Flavor::AnchoredSensitive => format!("^(?:{})", pattern),
        }
    }
}

/// Shared pattern evaluator with a compiled-expression cache.
pub struct PatternEngine {
    strict: bool,
    cache: RwLock<HashMap<(Flavor, String), Arc<Regex>>>,
}

impl PatternEngine {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Evaluate `pattern` (plain or rewrite form) against `target`.
    pub fn match_pattern(&self, pattern: &str, target: &str) -> Result<PatternMatch, PatternError> {
        let result = if is_rewrite_pattern(pattern) {
            self.match_rewrite(pattern, target)
        } else {
            self.compile(Flavor::AnchoredInsensitive, pattern)
                .map(|re| PatternMatch::unchanged(re.is_match(target), target))
        };
        self.fail_safe(result, PatternMatch::unchanged(false, target))
    }

    /// Evaluate a value only if it is written in rewrite form.
    ///
    /// Anything else never matches; literal comparison is the caller's job.
    pub fn match_rewrite_only(&self, pattern: &str, target: &str) -> Result<PatternMatch, PatternError> {
        if !is_rewrite_pattern(pattern) {
            return Ok(PatternMatch::unchanged(false, target));
        }
        let result = self.match_rewrite(pattern, target);
        self.fail_safe(result, PatternMatch::unchanged(false, target))
    }

    /// Case-insensitive regex match anchored at the start.
    pub fn is_match(&self, pattern: &str, target: &str) -> Result<bool, PatternError> {
        let result = self
            .compile(Flavor::AnchoredInsensitive, pattern)
            .map(|re| re.is_match(target));
        self.fail_safe(result, false)
    }

    /// Replace the leading match of the case-sensitive `pattern` in `target`.
    pub fn replace_leading(
        &self,
        pattern: &str,
        replacement: &str,
        target: &str,
    ) -> Result<String, PatternError> {
        let result = self
            .compile(Flavor::AnchoredSensitive, pattern)
            .map(|re| re.replace(target, translate_replacement(replacement).as_str()).into_owned());
        self.fail_safe(result, target.to_string())
    }

    fn match_rewrite(&self, pattern: &str, target: &str) -> Result<PatternMatch, PatternError> {
        let parts = split_unescaped(&pattern[1..pattern.len() - 1]);
        let search = parts.first().copied().unwrap_or_default();
        let substitution = parts.get(1).copied().filter(|s| !s.is_empty());
        let final_match = parts.get(2).copied().filter(|s| !s.is_empty());

        let final_re = match final_match {
            Some(p) => Some(self.compile(Flavor::AnchoredSensitive, p)?),
            None => None,
        };

        let Some(substitution) = substitution else {
            let search_re = self.compile(Flavor::AnchoredInsensitive, search)?;
            let matched = search_re.is_match(target)
                && final_re.as_ref().map(|re| re.is_match(target)).unwrap_or(true);
            return Ok(PatternMatch::unchanged(matched, target));
        };

        let search_re = self.compile(Flavor::Insensitive, search)?;
        let rewritten = search_re
            .replace_all(target, translate_replacement(substitution).as_str())
            .into_owned();

        match final_re {
            Some(re) if !re.is_match(&rewritten) => Ok(PatternMatch::unchanged(false, target)),
            _ => Ok(PatternMatch {
                matched: true,
                rewritten,
            }),
        }
    }

    fn compile(&self, flavor: Flavor, pattern: &str) -> Result<Arc<Regex>, PatternError> {
        let key = (flavor, pattern.to_string());
        if let Some(re) = self.cache.read().get(&key) {
            return Ok(re.clone());
        }

        let re = Regex::new(&flavor.source(pattern)).map_err(|source| PatternError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })?;
        let re = Arc::new(re);

        let mut cache = self.cache.write();
        if cache.len() >= MAX_CACHED_PATTERNS {
            cache.clear();
        }
        cache.insert(key, re.clone());
        Ok(re)
    }

    fn fail_safe<T>(&self, result: Result<T, PatternError>, fallback: T) -> Result<T, PatternError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if self.strict => Err(e),
            Err(e) => {
                warn!("Ignoring invalid pattern: {}", e);
                Ok(fallback)
            }
        }
    }
}

impl Default for PatternEngine {
    fn default() -> Self {
        Self::new(false)
    }
}

/// `true` for values written as `/…/` (a lone `/` is not a pattern).
pub fn is_rewrite_pattern(value: &str) -> bool {
    value.len() >= 2 && value.starts_with('/') && value.ends_with('/')
}

/// Split on `/` not preceded by a backslash.
fn split_unescaped(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev = None;
    for (i, c) in body.char_indices() {
        if c == '/' && prev != Some('\\') {
            parts.push(&body[start..i]);
            start = i + 1;
        }
        prev = Some(c);
    }
    parts.push(&body[start..]);
    parts
}

/// Convert a `\1` / `\g<name>` style substitution into `regex` replacement syntax.
fn translate_replacement(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len() + 4);
    let mut chars = replacement.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().copied().filter(|d| d.is_ascii_digit()) {
                        if group.len() == 2 {
                            break;
                        }
                        group.push(d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{}}}", group));
                }
                Some('g') => {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        let name: String = chars.by_ref().take_while(|c| *c != '>').collect();
                        out.push_str(&format!("${{{}}}", name));
                    } else {
                        out.push_str("\\g");
                    }
                }
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('t') => {
                    chars.next();
                    out.push('\t');
                }
                Some('\\') | Some('/') => {
                    out.push(chars.next().unwrap_or('\\'));
                }
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PatternEngine {
        PatternEngine::new(true)
    }

    #[test]
    fn test_plain_pattern_is_case_insensitive_prefix() {
        let e = engine();
        assert!(e.match_pattern("meet", "MEETING@example.com").unwrap().matched);
        assert!(!e.match_pattern("example", "meeting@example.com").unwrap().matched);
        assert_eq!(
            e.match_pattern("meet", "meeting").unwrap().rewritten,
            "meeting"
        );
    }

    #[test]
    fn test_rewrite_match_only() {
        let e = engine();
        let m = e.match_pattern("/.*@example.org/", "alice@example.org").unwrap();
        assert!(m.matched);
        assert_eq!(m.rewritten, "alice@example.org");

        assert!(!e.match_pattern("/.*@example.org/", "alice@other.org").unwrap().matched);
    }

    #[test]
    fn test_rewrite_without_substitution_checks_final_on_original() {
        let e = engine();
        assert!(e.match_pattern("/.*@example.org//alice.*/", "alice@example.org").unwrap().matched);
        assert!(!e.match_pattern("/.*@example.org//bob.*/", "alice@example.org").unwrap().matched);
    }

    #[test]
    fn test_rewrite_with_substitution() {
        let e = engine();
        let m = e
            .match_pattern(r"/(.*)@example.org/\1@other.com/", "alice@example.org")
            .unwrap();
        assert!(m.matched);
        assert_eq!(m.rewritten, "alice@other.com");
    }

    #[test]
    fn test_rewrite_with_final_match() {
        let e = engine();
        let ok = e
            .match_pattern(r"/(.*)@example.org/\1@other.com/\d+@other.com/", "1234@example.org")
            .unwrap();
        assert!(ok.matched);
        assert_eq!(ok.rewritten, "1234@other.com");

        let rejected = e
            .match_pattern(r"/(.*)@example.org/\1@other.com/\d+@other.com/", "alice@example.org")
            .unwrap();
        assert!(!rejected.matched);
        assert_eq!(rejected.rewritten, "alice@example.org");
    }

    #[test]
    fn test_final_match_is_case_sensitive() {
        let e = engine();
        assert!(!e.match_pattern("/alice//ALICE/", "alice").unwrap().matched);
    }

    #[test]
    fn test_escaped_slash_is_not_a_separator() {
        let e = engine();
        let m = e.match_pattern(r"/a\/b/c/", "a/b").unwrap();
        assert!(m.matched);
        assert_eq!(m.rewritten, "c");
    }

    #[test]
    fn test_named_group_and_dollar_are_literal_safe() {
        let e = engine();
        let m = e
            .match_pattern(r"/(?P<user>\w+)@x/\g<user>$@y/", "bob@x")
            .unwrap();
        assert_eq!(m.rewritten, "bob$@y");
    }

    #[test]
    fn test_rewrite_property_matches_plain_substitution() {
        let e = engine();
        let m = e.match_pattern(r"/(\d+)/n\1/", "call 12 and 34").unwrap();
        let expected = Regex::new(r"(?i)(\d+)").unwrap().replace_all("call 12 and 34", "n${1}");
        assert_eq!(m.rewritten, expected);
    }

    #[test]
    fn test_idempotent() {
        let e = engine();
        let a = e.match_pattern(r"/(.*)@a/\1@b/", "x@a").unwrap();
        let b = e.match_pattern(r"/(.*)@a/\1@b/", "x@a").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_regex_strict_vs_lenient() {
        assert!(PatternEngine::new(true).match_pattern("(", "x").is_err());

        let lenient = PatternEngine::new(false);
        let m = lenient.match_pattern("/(/", "x").unwrap();
        assert!(!m.matched);
        assert_eq!(m.rewritten, "x");
    }

    #[test]
    fn test_lone_slash_is_plain() {
        assert!(!is_rewrite_pattern("/"));
        assert!(is_rewrite_pattern("//"));
    }

    #[test]
    fn test_rewrite_only_ignores_literals() {
        let e = engine();
        assert!(!e.match_rewrite_only("alice", "alice").unwrap().matched);
        assert!(e.match_rewrite_only("/ali/", "alice").unwrap().matched);
    }

    #[test]
    fn test_replace_leading() {
        let e = engine();
        assert_eq!(
            e.replace_leading("newname", "room", "newname123@x").unwrap(),
            "room123@x"
        );
        assert_eq!(e.replace_leading(r"(\d+)", r"9\1", "12a34").unwrap(), "912a34");
        assert_eq!(e.replace_leading("x", "y", "axb").unwrap(), "axb");
    }
}
