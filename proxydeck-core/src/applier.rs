//! The single writer of the global proxy setting.
//!
//! All profile switches funnel through [`ProxyApplier::apply`], which keeps
//! at most one backend call in flight process-wide. Concurrent callers await
//! the in-flight result instead of racing a second write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::profiles::ProfileStore;
use crate::types::{ProxyAuth, ProxyDescriptor, DIRECT_PROFILE};

const CONFIRM_ATTEMPTS: u32 = 5;
const CONFIRM_INTERVAL: Duration = Duration::from_millis(200);

/// Host-provided proxy surface: the one global proxy setting, plus the
/// badge/notification affordances that track it.
#[async_trait]
pub trait ProxyBackend: Send + Sync {
    async fn set_proxy(&self, descriptor: &ProxyDescriptor) -> Result<()>;
    async fn current_proxy(&self) -> Result<ProxyDescriptor>;
    /// Register credentials for the host's auth-challenge hook.
    async fn install_auth(&self, auth: &ProxyAuth) -> Result<()>;
    async fn set_badge(&self, text: &str) -> Result<()>;
    async fn notify(&self, message: &str) -> Result<()>;
}

struct InFlight {
    target: String,
    done: watch::Receiver<Option<bool>>,
}

pub struct ProxyApplier {
    profiles: Arc<ProfileStore>,
    backend: Arc<dyn ProxyBackend>,
    in_flight: Mutex<Option<InFlight>>,
    confirm: AtomicBool,
}

enum Slot {
    Owner(watch::Sender<Option<bool>>),
    Waiter(String, watch::Receiver<Option<bool>>),
}

impl ProxyApplier {
    pub fn new(profiles: Arc<ProfileStore>, backend: Arc<dyn ProxyBackend>) -> Self {
        Self {
            profiles,
            backend,
            in_flight: Mutex::new(None),
            confirm: AtomicBool::new(false),
        }
    }

    /// Whether successful applies are confirmed by polling the backend.
    pub fn set_confirm(&self, confirm: bool) {
        self.confirm.store(confirm, Ordering::Relaxed);
    }

    /// Name of the profile the global setting currently reflects.
    pub fn current(&self) -> String {
        self.profiles.current()
    }

    /// Switch the global proxy to the named profile.
    ///
    /// Returns `Ok(true)` when the setting now reflects `name` (including
    /// the no-op fast path), `Ok(false)` when an in-flight apply for a
    /// different profile won instead, and `Err` when the switch itself
    /// failed. The current-profile pointer only ever names a profile whose
    /// push succeeded.
    pub async fn apply(&self, name: &str) -> Result<bool> {
        if name == self.profiles.current() {
            debug!("Profile {} already active, skipping apply", name);
            return Ok(true);
        }

        // Claim the guard or join the in-flight operation. No await between
        // the check and the claim, so the guard cannot be doubly claimed.
        let slot = {
            let mut guard = self.in_flight.lock();
            match guard.as_ref() {
                Some(flight) => Slot::Waiter(flight.target.clone(), flight.done.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *guard = Some(InFlight {
                        target: name.to_string(),
                        done: rx,
                    });
                    Slot::Owner(tx)
                }
            }
        };

        match slot {
            Slot::Waiter(target, mut done) => {
                let ok = loop {
                    if let Some(outcome) = *done.borrow() {
                        break outcome;
                    }
                    if done.changed().await.is_err() {
                        break false;
                    }
                };
                Ok(ok && target == name)
            }
            Slot::Owner(tx) => {
                let result = self.apply_inner(name).await;
                *self.in_flight.lock() = None;
                let _ = tx.send(Some(result.is_ok()));
                result.map(|_| true)
            }
        }
    }

    async fn apply_inner(&self, name: &str) -> Result<()> {
        let previous = self.profiles.current();
        let descriptor = self.profiles.descriptor(name)?;

        if let Some(auth) = self.profiles.auth(name) {
            self.backend.install_auth(&auth).await?;
        }

        if let Err(e) = self.backend.set_proxy(&descriptor).await {
            warn!("Proxy backend rejected switch to {}: {}", name, e);
            return Err(e);
        }
        // Committed only after the backend accepted the push. While the push
        // is in flight the pointer still names the previous profile, so the
        // no-op fast path cannot report an unconfirmed switch as done.
        self.profiles.set_current(name);

        if self.confirm.load(Ordering::Relaxed) {
            self.confirm_applied(name, &descriptor).await;
        }

        if let Err(e) = self.backend.set_badge(&badge_text(name)).await {
            warn!("Badge update failed: {}", e);
        }

        info!("Switched global proxy: {} -> {}", previous, name);

        let profiles = self.profiles.clone();
        tokio::spawn(async move {
            if let Err(e) = profiles.save().await {
                warn!("Deferred profile save failed: {}", e);
            }
        });

        Ok(())
    }

    /// Poll the backend until it reports the requested descriptor. Timing
    /// out resolves optimistically; the switch stays committed.
    async fn confirm_applied(&self, name: &str, descriptor: &ProxyDescriptor) {
        for attempt in 0..CONFIRM_ATTEMPTS {
            match self.backend.current_proxy().await {
                Ok(active) if active == *descriptor => {
                    debug!("Switch to {} confirmed after {} polls", name, attempt + 1);
                    return;
                }
                Ok(_) => {}
                Err(e) => debug!("Confirmation poll failed: {}", e),
            }
            tokio::time::sleep(CONFIRM_INTERVAL).await;
        }
        warn!(
            "Switch to {} not confirmed within {:?}, treating as committed",
            name,
            CONFIRM_INTERVAL * CONFIRM_ATTEMPTS
        );
    }
}

/// Toolbar badge text: empty for direct, otherwise the first three
/// characters of the profile name.
pub fn badge_text(name: &str) -> String {
    if name == DIRECT_PROFILE {
        String::new()
    } else {
        name.chars().take(3).collect()
    }
}
