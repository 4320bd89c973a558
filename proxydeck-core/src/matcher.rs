//! URL pattern matching for auto-switch rules.
//!
//! All entry points are total: malformed patterns or URLs evaluate to a
//! non-match and are logged, never propagated.

use regex::Regex;
use tracing::warn;
use url::Url;

use crate::types::RuleMatcher;

/// Evaluate a single rule matcher against a parsed URL.
pub fn matches(url: &Url, matcher: &RuleMatcher) -> bool {
    match matcher {
        RuleMatcher::Domain { pattern } => url
            .host_str()
            .map(|host| match_domain(host, pattern))
            .unwrap_or(false),
        RuleMatcher::Url { pattern } | RuleMatcher::Wildcard { pattern } => {
            match_glob(url.as_str(), pattern)
        }
        RuleMatcher::Regex { pattern } => match Regex::new(pattern) {
            Ok(re) => re.is_match(url.as_str()),
            Err(e) => {
                warn!("Invalid regex pattern {:?}: {}", pattern, e);
                false
            }
        },
    }
}

/// Domain matching with optional `*.` subdomain wildcard.
///
/// `*.example.com` matches `example.com` and any dot-suffixed child.
/// A bare `example.com` matches the exact host or any subdomain of it.
fn match_domain(host: &str, pattern: &str) -> bool {
    let host = host.to_lowercase();
    let pattern = pattern.to_lowercase();

    if let Some(suffix) = pattern.strip_prefix("*.") {
        host == suffix || host.ends_with(&format!(".{}", suffix))
    } else {
        host == pattern || host.ends_with(&format!(".{}", pattern))
    }
}

/// Anchored glob matching: `*` matches any run of characters, `?` exactly
/// one. Built char by char so regex metacharacters in the pattern stay
/// literal.
fn match_glob(value: &str, pattern: &str) -> bool {
    let mut regex_str = String::from("^");

    for ch in pattern.chars() {
        match ch {
            '*' => regex_str.push_str(".*"),
            '?' => regex_str.push('.'),
            '.' | '\\' | '(' | ')' | '[' | ']' | '{' | '}' | '+' | '^' | '$' | '|' | '-' => {
                regex_str.push('\\');
                regex_str.push(ch);
            }
            _ => regex_str.push(ch),
        }
    }

    regex_str.push('$');

    match Regex::new(&regex_str) {
        Ok(re) => re.is_match(value),
        Err(e) => {
            warn!("Glob pattern {:?} did not compile: {}", pattern, e);
            false
        }
    }
}

/// Normalized hostname for tab-state bookkeeping: lowercased, leading
/// `www.` stripped.
pub fn normalize_domain(host: &str) -> String {
    let host = host.to_lowercase();
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}

/// Pages the engine must never redirect or proxy-match: browser-internal
/// and extension URLs.
pub fn is_internal_url(url: &Url) -> bool {
    matches!(
        url.scheme(),
        "chrome" | "chrome-extension" | "about" | "edge" | "moz-extension" | "devtools"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_domain_wildcard_prefix() {
        let m = RuleMatcher::Domain {
            pattern: "*.example.com".to_string(),
        };
        assert!(matches(&url("https://example.com/"), &m));
        assert!(matches(&url("https://mail.example.com/inbox"), &m));
        assert!(matches(&url("https://a.b.example.com/"), &m));
        assert!(!matches(&url("https://notexample.com/"), &m));
        assert!(!matches(&url("https://example.com.evil.org/"), &m));
    }

    #[test]
    fn test_domain_bare_pattern_includes_subdomains() {
        let m = RuleMatcher::Domain {
            pattern: "example.com".to_string(),
        };
        assert!(matches(&url("https://example.com/"), &m));
        assert!(matches(&url("https://foo.example.com/"), &m));
        assert!(!matches(&url("https://badexample.com/"), &m));
    }

    #[test]
    fn test_domain_matching_is_case_insensitive() {
        let m = RuleMatcher::Domain {
            pattern: "Example.COM".to_string(),
        };
        assert!(matches(&url("https://EXAMPLE.com/"), &m));
    }

    #[test]
    fn test_url_glob() {
        let m = RuleMatcher::Url {
            pattern: "https://*.example.com/api/*".to_string(),
        };
        assert!(matches(&url("https://v1.example.com/api/users"), &m));
        assert!(!matches(&url("https://v1.example.com/web/users"), &m));
    }

    #[test]
    fn test_glob_question_mark_is_single_char() {
        let m = RuleMatcher::Wildcard {
            pattern: "https://host/?".to_string(),
        };
        assert!(matches(&url("https://host/a"), &m));
        assert!(!matches(&url("https://host/ab"), &m));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        // The dots must stay literal
        let m = RuleMatcher::Wildcard {
            pattern: "https://a.b/*".to_string(),
        };
        assert!(matches(&url("https://a.b/x"), &m));
        assert!(!matches(&url("https://aXb/x"), &m));
    }

    #[test]
    fn test_regex_matcher() {
        let m = RuleMatcher::Regex {
            pattern: r"^https://(\w+\.)?example\.com/".to_string(),
        };
        assert!(matches(&url("https://api.example.com/v2"), &m));
        assert!(!matches(&url("http://api.example.com/v2"), &m));
    }

    #[test]
    fn test_invalid_regex_is_a_non_match() {
        let m = RuleMatcher::Regex {
            pattern: "(unclosed".to_string(),
        };
        assert!(!matches(&url("https://example.com/"), &m));
    }

    #[test]
    fn test_hostless_url_never_matches_domain() {
        let m = RuleMatcher::Domain {
            pattern: "example.com".to_string(),
        };
        assert!(!matches(&url("data:text/plain,hello"), &m));
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("www.Example.com"), "example.com");
        assert_eq!(normalize_domain("mail.example.com"), "mail.example.com");
        assert_eq!(normalize_domain("wwwx.example.com"), "wwwx.example.com");
    }

    #[test]
    fn test_internal_urls() {
        assert!(is_internal_url(&url("chrome://settings/")));
        assert!(is_internal_url(&url("about:blank")));
        assert!(!is_internal_url(&url("https://example.com/")));
    }
}
