use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Browser tab identifier, as delivered by the host tab events.
pub type TabId = u32;

/// Reserved name of the synthetic no-proxy profile.
pub const DIRECT_PROFILE: &str = "direct";

/// Proxy scheme for fixed-server profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl std::fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyScheme::Http => write!(f, "http"),
            ProxyScheme::Https => write!(f, "https"),
            ProxyScheme::Socks4 => write!(f, "socks4"),
            ProxyScheme::Socks5 => write!(f, "socks5"),
        }
    }
}

/// Credentials for an authenticating proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// How a profile connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProfileKind {
    Direct,
    Fixed {
        scheme: ProxyScheme,
        host: String,
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<ProxyAuth>,
    },
}

/// A named proxy connection profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub display_name: String,
    pub kind: ProfileKind,
}

impl Profile {
    /// The synthetic direct-connection profile
    pub fn direct() -> Self {
        Self {
            name: DIRECT_PROFILE.to_string(),
            display_name: "Direct connection".to_string(),
            kind: ProfileKind::Direct,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.kind, ProfileKind::Direct)
    }
}

/// URL-matching strategy of a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleMatcher {
    Domain { pattern: String },
    Url { pattern: String },
    Wildcard { pattern: String },
    Regex { pattern: String },
}

impl RuleMatcher {
    pub fn pattern(&self) -> &str {
        match self {
            RuleMatcher::Domain { pattern }
            | RuleMatcher::Url { pattern }
            | RuleMatcher::Wildcard { pattern }
            | RuleMatcher::Regex { pattern } => pattern,
        }
    }
}

/// An auto-switch rule mapping matched URLs to a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub matcher: RuleMatcher,
    /// Name of the target profile; may dangle if the profile was deleted
    pub profile: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn default_priority() -> i32 {
    100
}

impl Rule {
    pub fn new(name: impl Into<String>, matcher: RuleMatcher, profile: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            matcher,
            profile: profile.into(),
            priority: default_priority(),
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

/// How a tab's current profile was assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentOrigin {
    Manual,
    Auto,
}

impl std::fmt::Display for AssignmentOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentOrigin::Manual => write!(f, "manual"),
            AssignmentOrigin::Auto => write!(f, "auto"),
        }
    }
}

/// Per-tab proxy assignment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabState {
    pub profile: String,
    pub origin: AssignmentOrigin,
    pub last_url: String,
    /// Normalized hostname of `last_url` (leading `www.` stripped)
    pub domain: String,
    pub updated_at: DateTime<Utc>,
    /// True while the tab has been seen but has not navigated yet
    pub deferred: bool,
}

impl TabState {
    /// Placeholder state for a freshly created/activated tab that has not
    /// navigated yet; carries the current global profile provisionally.
    pub fn deferred(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            origin: AssignmentOrigin::Auto,
            last_url: String::new(),
            domain: String::new(),
            updated_at: Utc::now(),
            deferred: true,
        }
    }
}

/// The wire shape pushed to the host proxy-setting API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ProxyDescriptor {
    Direct,
    Fixed {
        scheme: ProxyScheme,
        host: String,
        port: u16,
    },
}

/// Engine-wide behavior switches, persisted alongside profiles and rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub auto_switch_enabled: bool,
    /// Fall back to the direct profile when no rule matches
    pub fallback_to_direct: bool,
    /// Poll the backend after an apply until it reports the new descriptor
    pub confirm_apply: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_switch_enabled: true,
            fallback_to_direct: true,
            confirm_apply: false,
        }
    }
}

/// Tab lifecycle and navigation events delivered by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TabEvent {
    Created { tab_id: TabId },
    Activated { tab_id: TabId },
    Removed { tab_id: TabId },
    Navigation { tab_id: TabId, url: String },
}

/// Follow-up the host should perform after a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EngineAction {
    /// Re-issue the navigation so the request goes out through the new proxy
    Reload { tab_id: TabId, url: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_priority_defaults_on_deserialize() {
        let json = r#"{
            "id": "r1",
            "name": "work",
            "matcher": {"type": "domain", "pattern": "example.com"},
            "profile": "work",
            "enabled": true,
            "created_at": "2026-01-01T00:00:00Z"
        }"#;
        let rule: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.priority, 100);
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let direct = serde_json::to_value(&ProxyDescriptor::Direct).unwrap();
        assert_eq!(direct, serde_json::json!({"mode": "direct"}));

        let fixed = serde_json::to_value(&ProxyDescriptor::Fixed {
            scheme: ProxyScheme::Socks5,
            host: "127.0.0.1".to_string(),
            port: 1080,
        })
        .unwrap();
        assert_eq!(
            fixed,
            serde_json::json!({
                "mode": "fixed",
                "scheme": "socks5",
                "host": "127.0.0.1",
                "port": 1080
            })
        );
    }

    #[test]
    fn test_settings_default_on_missing_fields() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert!(settings.auto_switch_enabled);
        assert!(settings.fallback_to_direct);
        assert!(!settings.confirm_apply);
    }

    #[test]
    fn test_direct_profile_shape() {
        let p = Profile::direct();
        assert_eq!(p.name, DIRECT_PROFILE);
        assert!(p.is_direct());
    }
}
