//! Ordered rule evaluation: first enabled match at the highest priority wins.

use tracing::{debug, warn};
use url::Url;

use crate::error::{ProxydeckError, Result};
use crate::matcher;
use crate::types::Rule;

/// The user's auto-switch rule list.
///
/// Evaluation order is computed at match time (priority descending, stable
/// on ties), not stored pre-sorted, so edits never have to re-sort.
#[derive(Debug, Default, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Resolve a URL to the winning rule, if any.
    ///
    /// Unparsable URLs resolve to `None` rather than an error.
    pub fn resolve(&self, url: &str) -> Option<&Rule> {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(e) => {
                warn!("Unparsable URL {:?}: {}", url, e);
                return None;
            }
        };

        let mut candidates: Vec<&Rule> = self.rules.iter().filter(|r| r.enabled).collect();
        // Stable sort: rules sharing a priority keep their original order
        candidates.sort_by_key(|r| std::cmp::Reverse(r.priority));

        let winner = candidates
            .into_iter()
            .find(|r| matcher::matches(&parsed, &r.matcher));

        if let Some(rule) = winner {
            debug!("URL {} matched rule {} ({})", url, rule.name, rule.id);
        }
        winner
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Replace the whole rule list (the `updateRules` message path)
    pub fn replace(&mut self, rules: Vec<Rule>) {
        self.rules = rules;
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn remove(&mut self, id: &str) -> Result<()> {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != id);
        if self.rules.len() == before {
            return Err(ProxydeckError::RuleNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        match self.rules.iter_mut().find(|r| r.id == id) {
            Some(rule) => {
                rule.enabled = enabled;
                Ok(())
            }
            None => Err(ProxydeckError::RuleNotFound(id.to_string())),
        }
    }

    /// Whether an enabled domain rule for this exact pattern/profile pair
    /// already exists (used when learning rules from manual switches).
    pub fn has_domain_rule(&self, pattern: &str, profile: &str) -> bool {
        self.rules.iter().any(|r| {
            r.enabled
                && r.profile == profile
                && matches!(&r.matcher, crate::types::RuleMatcher::Domain { pattern: p } if p == pattern)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuleMatcher;

    fn domain_rule(name: &str, pattern: &str, profile: &str, priority: i32) -> Rule {
        let mut rule = Rule::new(
            name,
            RuleMatcher::Domain {
                pattern: pattern.to_string(),
            },
            profile,
        );
        rule.priority = priority;
        rule
    }

    #[test]
    fn test_highest_priority_wins() {
        let rules = RuleSet::from_rules(vec![
            domain_rule("low", "example.com", "home", 50),
            domain_rule("high", "example.com", "work", 200),
        ]);

        let winner = rules.resolve("https://example.com/").unwrap();
        assert_eq!(winner.name, "high");
    }

    #[test]
    fn test_priority_tie_keeps_list_order() {
        let rules = RuleSet::from_rules(vec![
            domain_rule("first", "example.com", "home", 100),
            domain_rule("second", "example.com", "work", 100),
        ]);

        let winner = rules.resolve("https://example.com/").unwrap();
        assert_eq!(winner.name, "first");
    }

    #[test]
    fn test_disabled_rules_are_skipped() {
        let mut disabled = domain_rule("off", "example.com", "work", 200);
        disabled.enabled = false;
        let rules = RuleSet::from_rules(vec![
            disabled,
            domain_rule("on", "example.com", "home", 10),
        ]);

        let winner = rules.resolve("https://example.com/").unwrap();
        assert_eq!(winner.name, "on");
    }

    #[test]
    fn test_no_match_returns_none() {
        let rules = RuleSet::from_rules(vec![domain_rule("r", "example.com", "work", 100)]);
        assert!(rules.resolve("https://unlisted.org/").is_none());
    }

    #[test]
    fn test_unparsable_url_returns_none() {
        let rules = RuleSet::from_rules(vec![domain_rule("r", "example.com", "work", 100)]);
        assert!(rules.resolve("not a url").is_none());
    }

    #[test]
    fn test_remove_unknown_rule_errors() {
        let mut rules = RuleSet::new();
        assert!(matches!(
            rules.remove("missing"),
            Err(ProxydeckError::RuleNotFound(_))
        ));
    }

    #[test]
    fn test_set_enabled_round_trip() {
        let rule = domain_rule("r", "example.com", "work", 100);
        let id = rule.id.clone();
        let mut rules = RuleSet::from_rules(vec![rule]);

        rules.set_enabled(&id, false).unwrap();
        assert!(rules.resolve("https://example.com/").is_none());

        rules.set_enabled(&id, true).unwrap();
        assert!(rules.resolve("https://example.com/").is_some());
    }

    #[test]
    fn test_has_domain_rule() {
        let rules = RuleSet::from_rules(vec![domain_rule("r", "example.com", "work", 100)]);
        assert!(rules.has_domain_rule("example.com", "work"));
        assert!(!rules.has_domain_rule("example.com", "home"));
        assert!(!rules.has_domain_rule("other.com", "work"));
    }
}
