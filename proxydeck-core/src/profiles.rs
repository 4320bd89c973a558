//! In-memory profile map, synchronized with the storage port.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{ProxydeckError, Result};
use crate::storage::KeyValueStore;
use crate::types::{Profile, ProfileKind, ProxyAuth, ProxyDescriptor, DIRECT_PROFILE};

const PROFILES_KEY: &str = crate::storage::keys::PROFILES;
const CURRENT_PROFILE_KEY: &str = crate::storage::keys::CURRENT_PROFILE;

/// Profile map plus the persisted current-profile pointer.
///
/// The in-memory map is always authoritative; persistence failures are
/// reported but never roll back memory. The synthetic `"direct"` profile is
/// guaranteed present and undeletable.
pub struct ProfileStore {
    store: Arc<dyn KeyValueStore>,
    profiles: RwLock<HashMap<String, Profile>>,
    /// Built connection descriptors, invalidated on profile mutation
    descriptors: RwLock<HashMap<String, ProxyDescriptor>>,
    current: RwLock<String>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(DIRECT_PROFILE.to_string(), Profile::direct());
        Self {
            store,
            profiles: RwLock::new(profiles),
            descriptors: RwLock::new(HashMap::new()),
            current: RwLock::new(DIRECT_PROFILE.to_string()),
        }
    }

    /// Populate the map from persistence. Fails soft: on a read error the
    /// store proceeds with the direct profile only.
    pub async fn load(&self) -> Result<()> {
        let mut loaded: HashMap<String, Profile> = match self.store.get(PROFILES_KEY).await {
            Ok(Some(text)) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Stored profiles are unreadable, starting direct-only: {}", e);
                HashMap::new()
            }),
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("Profile load failed, starting direct-only: {}", e);
                HashMap::new()
            }
        };

        loaded
            .entry(DIRECT_PROFILE.to_string())
            .or_insert_with(Profile::direct);

        let current = match self.store.get(CURRENT_PROFILE_KEY).await {
            Ok(Some(name)) if loaded.contains_key(&name) => name,
            _ => DIRECT_PROFILE.to_string(),
        };

        info!(
            "Loaded {} profiles, current: {}",
            loaded.len(),
            current
        );
        *self.profiles.write() = loaded;
        self.descriptors.write().clear();
        *self.current.write() = current;
        Ok(())
    }

    /// Persist the full map plus the current-profile pointer.
    pub async fn save(&self) -> Result<()> {
        let (text, current) = {
            let profiles = self.profiles.read();
            (serde_json::to_string(&*profiles)?, self.current.read().clone())
        };
        self.store.set(PROFILES_KEY, &text).await?;
        self.store.set(CURRENT_PROFILE_KEY, &current).await?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Profile> {
        self.profiles.read().get(name).cloned()
    }

    pub fn all(&self) -> HashMap<String, Profile> {
        self.profiles.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.read().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.read().contains_key(name)
    }

    /// Upsert a profile and drop its cached descriptor.
    pub fn add(&self, profile: Profile) -> Result<()> {
        if profile.name.is_empty() {
            return Err(ProxydeckError::InvalidOperation(
                "profile name must not be empty".to_string(),
            ));
        }
        if profile.name == DIRECT_PROFILE && !profile.is_direct() {
            return Err(ProxydeckError::InvalidOperation(
                "the direct profile cannot be repurposed".to_string(),
            ));
        }
        self.descriptors.write().remove(&profile.name);
        self.profiles.write().insert(profile.name.clone(), profile);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        if name == DIRECT_PROFILE {
            return Err(ProxydeckError::InvalidOperation(
                "the direct profile cannot be deleted".to_string(),
            ));
        }
        if self.profiles.write().remove(name).is_none() {
            return Err(ProxydeckError::ProfileNotFound(name.to_string()));
        }
        self.descriptors.write().remove(name);
        Ok(())
    }

    /// Build (or fetch from cache) the wire descriptor for a profile.
    pub fn descriptor(&self, name: &str) -> Result<ProxyDescriptor> {
        if let Some(cached) = self.descriptors.read().get(name) {
            return Ok(cached.clone());
        }

        let profile = self
            .get(name)
            .ok_or_else(|| ProxydeckError::ProfileNotFound(name.to_string()))?;

        let descriptor = match profile.kind {
            ProfileKind::Direct => ProxyDescriptor::Direct,
            ProfileKind::Fixed {
                scheme, host, port, ..
            } => ProxyDescriptor::Fixed { scheme, host, port },
        };

        self.descriptors
            .write()
            .insert(name.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    /// Credentials for an authenticating fixed proxy, if any.
    pub fn auth(&self, name: &str) -> Option<ProxyAuth> {
        match self.get(name)?.kind {
            ProfileKind::Fixed { auth, .. } => auth,
            ProfileKind::Direct => None,
        }
    }

    /// Name of the profile the global proxy setting currently reflects.
    pub fn current(&self) -> String {
        self.current.read().clone()
    }

    /// Move the current-profile pointer. Only the proxy applier writes this.
    pub(crate) fn set_current(&self, name: &str) {
        *self.current.write() = name.to_string();
    }
}
