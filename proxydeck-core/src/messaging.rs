//! Request/response surface for the popup/options UI.
//!
//! One message is one action. Every failure becomes a structured
//! `success:false` response; nothing across this boundary panics.

use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::orchestrator::Engine;
use crate::types::{Profile, Rule, Settings, TabId, TabState};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetProfiles,
    #[serde(rename_all = "camelCase")]
    SwitchProfile {
        profile_name: String,
        #[serde(default)]
        tab_id: Option<TabId>,
    },
    AddProfile {
        profile: Profile,
    },
    #[serde(rename_all = "camelCase")]
    DeleteProfile {
        profile_name: String,
    },
    AddRule {
        rule: Rule,
    },
    UpdateRules {
        rules: Vec<Rule>,
    },
    ReloadProfiles,
    TestAutoSwitch {
        url: String,
    },
    GetTabProxyStates,
    GetSettings,
    UpdateSettings {
        settings: Settings,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Error {
        success: bool,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    Profiles {
        success: bool,
        profiles: HashMap<String, Profile>,
        current_profile: String,
    },
    #[serde(rename_all = "camelCase")]
    Switched {
        success: bool,
        current_profile: String,
    },
    #[serde(rename_all = "camelCase")]
    RuleTest {
        success: bool,
        matched_rule: Option<Rule>,
        current_profile: String,
        rules_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    TabStates {
        success: bool,
        tab_states: HashMap<TabId, TabState>,
        current_profile: String,
    },
    SettingsView {
        success: bool,
        settings: Settings,
    },
    Ack {
        success: bool,
    },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ack { success: true }
    }

    pub fn error(err: impl Display) -> Self {
        Response::Error {
            success: false,
            error: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Response::Error { .. })
    }
}

fn ack(result: crate::error::Result<()>) -> Response {
    match result {
        Ok(()) => Response::ok(),
        Err(e) => Response::error(e),
    }
}

/// Dispatch one UI request against the engine.
pub async fn handle(engine: &Engine, request: Request) -> Response {
    match request {
        Request::GetProfiles => Response::Profiles {
            success: true,
            profiles: engine.profiles(),
            current_profile: engine.current_profile(),
        },
        Request::SwitchProfile {
            profile_name,
            tab_id,
        } => match engine.manual_switch(&profile_name, tab_id).await {
            Ok(()) => Response::Switched {
                success: true,
                current_profile: engine.current_profile(),
            },
            Err(e) => Response::error(e),
        },
        Request::AddProfile { profile } => ack(engine.add_profile(profile).await),
        Request::DeleteProfile { profile_name } => ack(engine.delete_profile(&profile_name).await),
        Request::AddRule { rule } => ack(engine.add_rule(rule).await),
        Request::UpdateRules { rules } => ack(engine.update_rules(rules).await),
        Request::ReloadProfiles => ack(engine.reload().await),
        Request::TestAutoSwitch { url } => Response::RuleTest {
            success: true,
            matched_rule: engine.test_url(&url),
            current_profile: engine.current_profile(),
            rules_count: engine.rule_count(),
        },
        Request::GetTabProxyStates => Response::TabStates {
            success: true,
            tab_states: engine.tab_states(),
            current_profile: engine.current_profile(),
        },
        Request::GetSettings => Response::SettingsView {
            success: true,
            settings: engine.settings(),
        },
        Request::UpdateSettings { settings } => ack(engine.update_settings(settings).await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::ProxyBackend;
    use crate::storage::MemoryStore;
    use crate::types::{ProfileKind, ProxyAuth, ProxyDescriptor, ProxyScheme, DIRECT_PROFILE};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NullBackend;

    #[async_trait]
    impl ProxyBackend for NullBackend {
        async fn set_proxy(&self, _d: &ProxyDescriptor) -> crate::error::Result<()> {
            Ok(())
        }
        async fn current_proxy(&self) -> crate::error::Result<ProxyDescriptor> {
            Ok(ProxyDescriptor::Direct)
        }
        async fn install_auth(&self, _a: &ProxyAuth) -> crate::error::Result<()> {
            Ok(())
        }
        async fn set_badge(&self, _t: &str) -> crate::error::Result<()> {
            Ok(())
        }
        async fn notify(&self, _m: &str) -> crate::error::Result<()> {
            Ok(())
        }
    }

    async fn engine() -> Engine {
        Engine::start(Arc::new(MemoryStore::new()), Arc::new(NullBackend))
            .await
            .unwrap()
    }

    fn work_profile() -> Profile {
        Profile {
            name: "work".to_string(),
            display_name: "Work".to_string(),
            kind: ProfileKind::Fixed {
                scheme: ProxyScheme::Http,
                host: "proxy.internal".to_string(),
                port: 3128,
                auth: None,
            },
        }
    }

    #[test]
    fn test_requests_parse_from_ui_wire_shapes() {
        let req: Request =
            serde_json::from_str(r#"{"action": "getProfiles"}"#).unwrap();
        assert!(matches!(req, Request::GetProfiles));

        let req: Request = serde_json::from_str(
            r#"{"action": "switchProfile", "profileName": "work", "tabId": 7}"#,
        )
        .unwrap();
        match req {
            Request::SwitchProfile {
                profile_name,
                tab_id,
            } => {
                assert_eq!(profile_name, "work");
                assert_eq!(tab_id, Some(7));
            }
            other => panic!("unexpected request: {:?}", other),
        }

        // tabId is optional
        let req: Request =
            serde_json::from_str(r#"{"action": "switchProfile", "profileName": "work"}"#).unwrap();
        assert!(matches!(
            req,
            Request::SwitchProfile { tab_id: None, .. }
        ));

        assert!(serde_json::from_str::<Request>(r#"{"action": "unknownThing"}"#).is_err());
    }

    #[tokio::test]
    async fn test_add_then_get_profiles() {
        let engine = engine().await;

        let response = handle(
            &engine,
            Request::AddProfile {
                profile: work_profile(),
            },
        )
        .await;
        assert!(response.is_success());

        match handle(&engine, Request::GetProfiles).await {
            Response::Profiles {
                profiles,
                current_profile,
                ..
            } => {
                assert!(profiles.contains_key("work"));
                assert!(profiles.contains_key(DIRECT_PROFILE));
                assert_eq!(current_profile, DIRECT_PROFILE);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_direct_is_a_structured_error() {
        let engine = engine().await;
        let response = handle(
            &engine,
            Request::DeleteProfile {
                profile_name: DIRECT_PROFILE.to_string(),
            },
        )
        .await;

        match response {
            Response::Error { success, error } => {
                assert!(!success);
                assert!(error.contains("direct"));
            }
            other => panic!("unexpected response: {:?}", other),
        }
        // Store unchanged
        assert!(engine.profiles().contains_key(DIRECT_PROFILE));
    }

    #[tokio::test]
    async fn test_switch_to_unknown_profile_is_a_structured_error() {
        let engine = engine().await;
        let response = handle(
            &engine,
            Request::SwitchProfile {
                profile_name: "ghost".to_string(),
                tab_id: None,
            },
        )
        .await;
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_rule_tester_reports_without_applying() {
        let engine = engine().await;
        handle(
            &engine,
            Request::AddProfile {
                profile: work_profile(),
            },
        )
        .await;
        handle(
            &engine,
            Request::AddRule {
                rule: Rule::new(
                    "work sites",
                    crate::types::RuleMatcher::Domain {
                        pattern: "example.com".to_string(),
                    },
                    "work",
                ),
            },
        )
        .await;

        match handle(
            &engine,
            Request::TestAutoSwitch {
                url: "https://example.com/".to_string(),
            },
        )
        .await
        {
            Response::RuleTest {
                matched_rule,
                current_profile,
                rules_count,
                ..
            } => {
                assert_eq!(matched_rule.unwrap().profile, "work");
                assert_eq!(current_profile, DIRECT_PROFILE);
                assert_eq!(rules_count, 1);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let engine = engine().await;
        let mut settings = engine.settings();
        settings.auto_switch_enabled = false;

        assert!(handle(&engine, Request::UpdateSettings { settings })
            .await
            .is_success());

        match handle(&engine, Request::GetSettings).await {
            Response::SettingsView { settings, .. } => {
                assert!(!settings.auto_switch_enabled)
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
