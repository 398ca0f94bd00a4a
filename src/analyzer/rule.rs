// ABOUTME: Rule string anatomy: dialect classifier, combinator splitter, and the ##suffix parser.
// ABOUTME: Classification is purely syntactic; unclassifiable strings fall through to Default.

use regex::Regex;
use tracing::debug;

/// The six rule dialects, determined from the rule string's prefix/shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Default,
    Css,
    XPath,
    JsonPath,
    Script,
    Regex,
}

/// Classify a rule string. First match wins, checked in this order:
/// `@css:`, `@XPath:`/`//`, `@json:`/`$.`, `@js:`/`<js>`, leading `:`,
/// otherwise Default. There is no error case.
pub fn classify(rule: &str) -> RuleType {
    let r = rule.trim_start();
    if r.starts_with("@css:") {
        RuleType::Css
    } else if has_xpath_prefix(r) || r.starts_with("//") {
        RuleType::XPath
    } else if r.starts_with("@json:") || r.starts_with("$.") {
        RuleType::JsonPath
    } else if r.starts_with("@js:") || r.starts_with("<js>") {
        RuleType::Script
    } else if r.starts_with(':') {
        RuleType::Regex
    } else {
        RuleType::Default
    }
}

fn has_xpath_prefix(rule: &str) -> bool {
    rule.get(..7)
        .map_or(false, |p| p.eq_ignore_ascii_case("@xpath:"))
}

/// Strip the dialect prefix from a classified rule body.
pub fn strip_prefix(rule: &str, rule_type: RuleType) -> &str {
    let r = rule.trim();
    match rule_type {
        RuleType::Css => r.strip_prefix("@css:").unwrap_or(r),
        RuleType::XPath => {
            if has_xpath_prefix(r) {
                &r[7..]
            } else {
                r
            }
        }
        RuleType::JsonPath => r.strip_prefix("@json:").unwrap_or(r),
        RuleType::Regex => r.strip_prefix(':').unwrap_or(r),
        // Script prefixes carry meaning for the two-tier invocation; keep them.
        RuleType::Script | RuleType::Default => r,
    }
}

/// How sub-rule results merge when a rule contains a combinator token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCombinator {
    None,
    /// `&&`: concatenate all sub-results in part order.
    And,
    /// `||`: first sub-rule with a non-empty result wins.
    Or,
    /// `%%`: round-robin interleave of sub-results.
    Percent,
}

/// Split a compound rule into its parts and the combinator joining them.
///
/// Token types are checked in priority order `&&` > `||` > `%%`; the first
/// type found splits the whole rule on all its occurrences. Mixed
/// combinators in one rule are not supported. The scan is textual, so a
/// combinator-like substring inside a regex body will split too; preserved
/// for rule compatibility.
pub fn split_combined(rule: &str) -> (Vec<&str>, RuleCombinator) {
    for (token, combinator) in [
        ("&&", RuleCombinator::And),
        ("||", RuleCombinator::Or),
        ("%%", RuleCombinator::Percent),
    ] {
        if rule.contains(token) {
            let parts: Vec<&str> = rule
                .split(token)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            return (parts, combinator);
        }
    }
    (vec![rule], RuleCombinator::None)
}

/// A rule with its optional `##pattern##replacement` suffix stripped off.
///
/// `body` is what reaches the backend; the suffix is applied as a global
/// regex substitution to every extracted string afterwards. A bare
/// `##pattern##` (or `##pattern`) means "delete".
#[derive(Debug, Clone)]
pub struct ParsedRule {
    pub body: String,
    pub regex_pattern: Option<String>,
    pub regex_replace: String,
}

impl ParsedRule {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let mut pieces = raw.splitn(3, "##");
        let body = pieces.next().unwrap_or_default().to_string();
        let pattern = pieces.next().filter(|p| !p.is_empty()).map(String::from);
        let replace = pieces.next().unwrap_or_default().to_string();
        Self {
            body,
            regex_pattern: pattern,
            regex_replace: replace,
        }
    }

    pub fn has_replacement(&self) -> bool {
        self.regex_pattern.is_some()
    }

    /// Apply the replacement suffix to a batch of extracted strings.
    ///
    /// An uncompilable pattern leaves the extraction unmodified; rule
    /// errors never abort an otherwise-working extraction.
    pub fn apply_replacement(&self, values: Vec<String>) -> Vec<String> {
        let Some(ref pattern) = self.regex_pattern else {
            return values;
        };
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                debug!(pattern, error = %e, "replacement pattern failed to compile");
                return values;
            }
        };
        values
            .into_iter()
            .map(|v| re.replace_all(&v, self.regex_replace.as_str()).into_owned())
            .filter(|v| !v.is_empty())
            .collect()
    }
}
