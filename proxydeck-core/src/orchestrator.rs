//! The auto-switch engine: ties rule resolution, the profile store, the
//! proxy applier and per-tab state into one decision procedure.
//!
//! Per tab the conceptual lifecycle is `Unseen -> Deferred ->
//! Bound(Manual | Auto)`. Navigation drives the decision procedure;
//! activation lazily reconciles a bound tab against the shared global
//! setting; closing a tab drops its record.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::applier::{ProxyApplier, ProxyBackend};
use crate::error::{ProxydeckError, Result};
use crate::matcher;
use crate::profiles::ProfileStore;
use crate::resolver::RuleSet;
use crate::storage::KeyValueStore;
use crate::tabs::TabTracker;
use crate::types::{
    AssignmentOrigin, EngineAction, Profile, Rule, RuleMatcher, Settings, TabEvent, TabId,
    TabState, DIRECT_PROFILE,
};

const RULES_KEY: &str = crate::storage::keys::RULES;
const SETTINGS_KEY: &str = crate::storage::keys::SETTINGS;

/// How many times a decision re-enters the applier when a concurrent apply
/// for a different profile wins the guard first.
const APPLY_ATTEMPTS: usize = 2;

pub struct Engine {
    store: Arc<dyn KeyValueStore>,
    profiles: Arc<ProfileStore>,
    applier: ProxyApplier,
    backend: Arc<dyn ProxyBackend>,
    rules: RwLock<RuleSet>,
    tabs: TabTracker,
    settings: RwLock<Settings>,
}

impl Engine {
    /// Load persisted state and assemble the engine. Unreadable profiles,
    /// rules or settings degrade to their defaults rather than failing.
    pub async fn start(
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn ProxyBackend>,
    ) -> Result<Self> {
        let profiles = Arc::new(ProfileStore::new(store.clone()));
        profiles.load().await?;

        let applier = ProxyApplier::new(profiles.clone(), backend.clone());

        let rules: Vec<Rule> = match store.get(RULES_KEY).await {
            Ok(Some(text)) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Stored rules are unreadable, starting empty: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Rule load failed, starting empty: {}", e);
                Vec::new()
            }
        };

        let settings: Settings = match store.get(SETTINGS_KEY).await {
            Ok(Some(text)) => serde_json::from_str(&text).unwrap_or_default(),
            _ => Settings::default(),
        };
        applier.set_confirm(settings.confirm_apply);

        info!(
            "Engine started: {} profiles, {} rules, current profile {}",
            profiles.names().len(),
            rules.len(),
            profiles.current()
        );

        Ok(Self {
            store,
            profiles,
            applier,
            backend,
            rules: RwLock::new(RuleSet::from_rules(rules)),
            tabs: TabTracker::new(),
            settings: RwLock::new(settings),
        })
    }

    /// Single entry point for host tab events; delivery order per tab is
    /// the host's responsibility.
    pub async fn handle_event(&self, event: TabEvent) -> Option<EngineAction> {
        match event {
            TabEvent::Created { tab_id } => {
                self.defer_if_unseen(tab_id);
                None
            }
            TabEvent::Activated { tab_id } => {
                self.on_activated(tab_id).await;
                None
            }
            TabEvent::Removed { tab_id } => {
                if self.tabs.remove(tab_id).is_some() {
                    debug!("Tab {} closed, state dropped", tab_id);
                }
                None
            }
            TabEvent::Navigation { tab_id, url } => self.on_navigation(tab_id, &url).await,
        }
    }

    /// A freshly seen tab gets a placeholder bound to the current global
    /// profile; no proxy call until it navigates. Keeps a burst of restored
    /// tabs from triggering a storm of switches.
    fn defer_if_unseen(&self, tab_id: TabId) {
        if !self.tabs.contains(tab_id) {
            self.tabs.set(tab_id, TabState::deferred(self.applier.current()));
            debug!("Tab {} deferred on {}", tab_id, self.applier.current());
        }
    }

    /// Focused tab: if it is bound to a profile the global setting has since
    /// drifted away from, silently re-apply it. No navigation is forced; the
    /// shared proxy is swapped to match what the user is looking at.
    async fn on_activated(&self, tab_id: TabId) {
        let state = match self.tabs.get(tab_id) {
            Some(state) => state,
            None => {
                self.defer_if_unseen(tab_id);
                return;
            }
        };

        if state.deferred || state.profile == self.applier.current() {
            return;
        }

        debug!(
            "Reconciling tab {}: {} -> {}",
            tab_id,
            self.applier.current(),
            state.profile
        );
        if let Err(e) = self.apply_with_retry(&state.profile).await {
            warn!("Reconcile for tab {} failed: {}", tab_id, e);
        }
    }

    /// The decision procedure, run on every navigation.
    async fn on_navigation(&self, tab_id: TabId, url: &str) -> Option<EngineAction> {
        let settings = *self.settings.read();
        if !settings.auto_switch_enabled {
            return None;
        }

        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(e) => {
                warn!("Ignoring unparsable navigation target {:?}: {}", url, e);
                return None;
            }
        };
        if matcher::is_internal_url(&parsed) {
            return None;
        }

        let domain = parsed
            .host_str()
            .map(matcher::normalize_domain)
            .unwrap_or_default();
        let prior = self.tabs.get(tab_id);

        let expected = match self.rules.read().resolve(url) {
            Some(rule) => rule.profile.clone(),
            None if settings.fallback_to_direct => DIRECT_PROFILE.to_string(),
            None => match &prior {
                // No fallback: a bound tab keeps its assignment
                Some(state) if !state.deferred => state.profile.clone(),
                _ => DIRECT_PROFILE.to_string(),
            },
        };

        // Same-site navigation never silently overrides an explicit choice
        let (target, origin) = match &prior {
            Some(state)
                if state.origin == AssignmentOrigin::Manual
                    && !state.deferred
                    && state.domain == domain =>
            {
                (state.profile.clone(), AssignmentOrigin::Manual)
            }
            _ => (expected, AssignmentOrigin::Auto),
        };

        // Re-processing the same navigation with the same outcome is a
        // no-op; this is what breaks redirect loops.
        if let Some(state) = &prior {
            if !state.deferred && state.last_url == url && state.profile == target {
                return None;
            }
        }

        let mut switched = false;
        if target != self.applier.current() {
            match self.apply_with_retry(&target).await {
                Ok(applied) => switched = applied,
                Err(e) => {
                    warn!("Auto switch to {} failed for tab {}: {}", target, tab_id, e);
                    let _ = self
                        .backend
                        .notify(&format!("Proxy switch to {} failed", target))
                        .await;
                    return None;
                }
            }
        }

        self.tabs.set(
            tab_id,
            TabState {
                profile: target.clone(),
                origin,
                last_url: url.to_string(),
                domain,
                updated_at: Utc::now(),
                deferred: false,
            },
        );

        if switched {
            info!("Tab {} auto-switched to {} for {}", tab_id, target, url);
            let _ = self
                .backend
                .notify(&format!("Switched to proxy profile: {}", target))
                .await;
            // Re-issue the request so it leaves through the new proxy
            return Some(EngineAction::Reload {
                tab_id,
                url: url.to_string(),
            });
        }
        None
    }

    /// Run the applier, re-entering once if a concurrent apply for another
    /// profile held the guard. `Ok(false)` means the switch stayed
    /// superseded; activation-time reconciliation picks it up later.
    async fn apply_with_retry(&self, target: &str) -> Result<bool> {
        for _ in 0..APPLY_ATTEMPTS {
            if self.applier.apply(target).await? {
                return Ok(true);
            }
        }
        debug!("Apply for {} superseded by a concurrent switch", target);
        Ok(false)
    }

    /// Explicit user switch, optionally bound to a tab. Binding marks the
    /// tab Manual and learns a domain rule so the choice is remembered.
    pub async fn manual_switch(&self, profile: &str, tab_id: Option<TabId>) -> Result<()> {
        if !self.apply_with_retry(profile).await? {
            return Err(ProxydeckError::Backend(
                "a concurrent switch kept winning the apply guard".to_string(),
            ));
        }

        let tab_id = match tab_id {
            Some(id) => id,
            None => return Ok(()),
        };

        let (last_url, domain) = self
            .tabs
            .get(tab_id)
            .map(|state| (state.last_url, state.domain))
            .unwrap_or_default();

        self.tabs.set(
            tab_id,
            TabState {
                profile: profile.to_string(),
                origin: AssignmentOrigin::Manual,
                last_url,
                domain: domain.clone(),
                updated_at: Utc::now(),
                deferred: false,
            },
        );

        if !domain.is_empty() {
            let learned = {
                let mut rules = self.rules.write();
                if rules.has_domain_rule(&domain, profile) {
                    false
                } else {
                    rules.push(Rule::new(
                        format!("{} via {}", domain, profile),
                        RuleMatcher::Domain {
                            pattern: domain.clone(),
                        },
                        profile,
                    ));
                    true
                }
            };
            if learned {
                info!("Learned rule from manual switch: {} -> {}", domain, profile);
                if let Err(e) = self.save_rules().await {
                    warn!("Could not persist learned rule: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Dry-run the resolver for the UI's rule tester; nothing is applied.
    pub fn test_url(&self, url: &str) -> Option<Rule> {
        self.rules.read().resolve(url).cloned()
    }

    // ---- state surface for messaging and the CLI ----

    pub fn current_profile(&self) -> String {
        self.applier.current()
    }

    pub fn profiles(&self) -> std::collections::HashMap<String, Profile> {
        self.profiles.all()
    }

    pub fn tab_states(&self) -> std::collections::HashMap<TabId, TabState> {
        self.tabs.snapshot()
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.rules.read().rules().to_vec()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    pub fn settings(&self) -> Settings {
        *self.settings.read()
    }

    // ---- mutation surface ----

    /// Upsert a profile. The in-memory map mutates even when persistence
    /// fails; the error only reports the write problem.
    pub async fn add_profile(&self, profile: Profile) -> Result<()> {
        self.profiles.add(profile)?;
        self.profiles.save().await
    }

    pub async fn delete_profile(&self, name: &str) -> Result<()> {
        self.profiles.remove(name)?;
        self.profiles.save().await
    }

    pub async fn update_rules(&self, rules: Vec<Rule>) -> Result<()> {
        self.rules.write().replace(rules);
        self.save_rules().await
    }

    pub async fn add_rule(&self, rule: Rule) -> Result<()> {
        self.rules.write().push(rule);
        self.save_rules().await
    }

    pub async fn remove_rule(&self, id: &str) -> Result<()> {
        self.rules.write().remove(id)?;
        self.save_rules().await
    }

    pub async fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.rules.write().set_enabled(id, enabled)?;
        self.save_rules().await
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<()> {
        *self.settings.write() = settings;
        self.applier.set_confirm(settings.confirm_apply);
        let text = serde_json::to_string(&settings)?;
        self.store.set(SETTINGS_KEY, &text).await
    }

    /// Re-read profiles and rules from persistence (the `reloadProfiles`
    /// message path).
    pub async fn reload(&self) -> Result<()> {
        self.profiles.load().await?;
        let rules: Vec<Rule> = match self.store.get(RULES_KEY).await? {
            Some(text) => serde_json::from_str(&text).unwrap_or_default(),
            None => Vec::new(),
        };
        self.rules.write().replace(rules);
        Ok(())
    }

    async fn save_rules(&self) -> Result<()> {
        let text = {
            let rules = self.rules.read();
            serde_json::to_string(rules.rules())?
        };
        self.store.set(RULES_KEY, &text).await
    }
}
