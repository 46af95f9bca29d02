//! Glob-style resource patterns
//!
//! - `*` matches within one segment
//! - `**` matches across segments; `**/` also matches zero segments
//! - `?` matches one non-separator character
//!
//! The separator comes from the capability type: `/` for paths, `.` for
//! hosts. Resources without a separator are a single segment, so `*`
//! matches anything.

use crate::security::capability::CapabilityError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone)]
pub struct ResourcePattern {
    raw: String,
    separator: Option<char>,
    regex: Regex,
}

impl ResourcePattern {
    pub fn new(pattern: &str, separator: Option<char>) -> Result<Self, CapabilityError> {
        let source = glob_to_regex(pattern, separator);
        let regex = Regex::new(&source).map_err(|e| CapabilityError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            raw: pattern.to_string(),
            separator,
            regex,
        })
    }

    pub fn matches(&self, resource: &str) -> bool {
        self.regex.is_match(resource)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn separator(&self) -> Option<char> {
        self.separator
    }
}

fn glob_to_regex(pattern: &str, separator: Option<char>) -> String {
    let not_sep = match separator {
        Some(sep) => format!("[^{}]", regex::escape(&sep.to_string())),
        None => ".".to_string(),
    };
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                match separator {
                    Some(sep) if chars.get(i) == Some(&sep) => {
                        out.push_str(&format!("(?:.*{})?", regex::escape(&sep.to_string())));
                        i += 1;
                    }
                    _ => out.push_str(".*"),
                }
                continue;
            }
            '*' => {
                out.push_str(&not_sep);
                out.push('*');
            }
            '?' => out.push_str(&not_sep),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

impl PartialEq for ResourcePattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.separator == other.separator
    }
}

impl Eq for ResourcePattern {}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for ResourcePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// Deserializes with `/` as separator; tokens re-derive it from their capability
impl<'de> Deserialize<'de> for ResourcePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ResourcePattern::new(&raw, Some('/')).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/data/*", "/data/a.txt", true)]
    #[case("/data/*", "/data/sub/a.txt", false)]
    #[case("/data/**", "/data/sub/deep/a.txt", true)]
    #[case("/data/**/*.csv", "/data/x.csv", true)]
    #[case("/data/**/*.csv", "/data/a/b/x.csv", true)]
    #[case("/data/**/*.csv", "/data/a/b/x.txt", false)]
    #[case("/tmp/file?.log", "/tmp/file1.log", true)]
    #[case("/tmp/file?.log", "/tmp/file/.log", false)]
    #[case("/etc/passwd", "/etc/passwd", true)]
    #[case("/etc/passwd", "/etc/passwd2", false)]
    fn test_path_globs(#[case] pattern: &str, #[case] resource: &str, #[case] expected: bool) {
        let p = ResourcePattern::new(pattern, Some('/')).unwrap();
        assert_eq!(p.matches(resource), expected, "{} vs {}", pattern, resource);
    }

    #[rstest]
    #[case("*.example.com", "api.example.com", true)]
    #[case("*.example.com", "a.b.example.com", false)]
    #[case("**.example.com", "a.b.example.com", true)]
    #[case("**.example.com", "example.com", true)]
    #[case("*.example.com", "example.org", false)]
    fn test_host_globs(#[case] pattern: &str, #[case] resource: &str, #[case] expected: bool) {
        let p = ResourcePattern::new(pattern, Some('.')).unwrap();
        assert_eq!(p.matches(resource), expected);
    }

    #[test]
    fn test_no_separator_star_matches_everything() {
        let p = ResourcePattern::new("*", None).unwrap();
        assert!(p.matches("HOME"));
        assert!(p.matches("a/b.c"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let p = ResourcePattern::new("/data/(x)+[1].txt", Some('/')).unwrap();
        assert!(p.matches("/data/(x)+[1].txt"));
        assert!(!p.matches("/data/xx1.txt"));
    }
}
