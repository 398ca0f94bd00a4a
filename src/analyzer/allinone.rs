// ABOUTME: AllInOne regex backend: rules of the form :<pattern> matched over the raw content.
// ABOUTME: Each match is one row; capture groups are addressed as $N from element context.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static GROUP_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$(\d+)$").unwrap());

/// Run an AllInOne pattern and return the whole match per row.
pub fn parse(content: &str, pattern: &str) -> Vec<String> {
    rows(content, pattern)
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Run an AllInOne pattern and return each match's capture groups as a row.
/// Group 0 is the whole match; unmatched optional groups are empty strings
/// so group indices stay parallel across rows.
pub fn rows(content: &str, pattern: &str) -> Vec<Vec<String>> {
    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            debug!(pattern, error = %e, "AllInOne pattern failed to compile");
            return vec![];
        }
    };
    re.captures_iter(content)
        .map(|caps| {
            (0..caps.len())
                .map(|i| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect()
        })
        .collect()
}

/// Project a `$N` group reference out of one capture row.
pub fn project(row: &[String], rule: &str) -> Option<String> {
    let caps = GROUP_REF.captures(rule.trim())?;
    let idx: usize = caps[1].parse().ok()?;
    row.get(idx).filter(|s| !s.is_empty()).cloned()
}

/// True when the rule is a bare `$N` group reference.
pub fn is_group_ref(rule: &str) -> bool {
    GROUP_REF.is_match(rule.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <a href="/b/1">Book One</a>
        <a href="/b/2">Book Two</a>
    "#;

    const PATTERN: &str = r#"<a href="([^"]+)">([^<]+)</a>"#;

    #[test]
    fn test_parse_returns_whole_match_per_row() {
        let out = parse(SAMPLE, PATTERN);
        assert_eq!(out.len(), 2);
        assert!(out[0].contains("Book One"));
        assert!(out[1].contains("Book Two"));
    }

    #[test]
    fn test_rows_carry_parallel_groups() {
        let rows = rows(SAMPLE, PATTERN);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], "/b/1");
        assert_eq!(rows[0][2], "Book One");
        assert_eq!(rows[1][1], "/b/2");
        assert_eq!(rows[1][2], "Book Two");
    }

    #[test]
    fn test_project_group_reference() {
        let rows = rows(SAMPLE, PATTERN);
        assert_eq!(project(&rows[0], "$2").as_deref(), Some("Book One"));
        assert_eq!(project(&rows[1], "$1").as_deref(), Some("/b/2"));
        assert!(project(&rows[0], "$9").is_none());
        assert!(project(&rows[0], "name").is_none());
    }

    #[test]
    fn test_is_group_ref() {
        assert!(is_group_ref("$1"));
        assert!(is_group_ref(" $12 "));
        assert!(!is_group_ref("$.data"));
        assert!(!is_group_ref("class.a"));
    }

    #[test]
    fn test_bad_pattern_yields_empty() {
        assert!(parse(SAMPLE, "([unclosed").is_empty());
    }
}
