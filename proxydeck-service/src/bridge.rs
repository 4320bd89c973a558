//! Native-messaging bridge to the browser extension shim.
//!
//! Frames are the Chrome native-messaging shape: a u32 little-endian byte
//! length followed by one JSON document. The extension side forwards tab
//! events and UI requests down to us and performs the actual
//! `chrome.proxy`/badge/notification calls we send up, replying with a
//! correlation id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use proxydeck_core::applier::ProxyBackend;
use proxydeck_core::error::{ProxydeckError, Result};
use proxydeck_core::messaging::{Request, Response};
use proxydeck_core::types::{EngineAction, ProxyAuth, ProxyDescriptor, TabEvent};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// How long a backend call may wait for the extension to answer.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the extension shim sends down.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inbound {
    /// Tab lifecycle/navigation event
    Tab { event: TabEvent },
    /// UI request to answer with a correlated response
    Request { id: u64, request: Request },
    /// Answer to a backend call we issued
    Reply {
        id: u64,
        #[serde(default)]
        ok: bool,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        proxy: Option<ProxyDescriptor>,
    },
}

/// Everything we send up to the extension shim.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outbound {
    Response { id: u64, response: Response },
    Action { action: EngineAction },
    SetProxy { id: u64, descriptor: ProxyDescriptor },
    GetProxy { id: u64 },
    InstallAuth { id: u64, auth: ProxyAuth },
    SetBadge { text: String },
    Notify { message: String },
}

#[derive(Debug)]
struct Reply {
    ok: bool,
    error: Option<String>,
    proxy: Option<ProxyDescriptor>,
}

/// Writer half plus the pending-reply table. The reader loop lives in main
/// and routes `Inbound::Reply` frames back here.
pub struct HostBridge {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Mutex<HashMap<u64, tokio::sync::oneshot::Sender<Reply>>>,
    next_id: AtomicU64,
}

impl HostBridge {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Write one length-prefixed frame.
    pub async fn send(&self, frame: &Outbound) -> Result<()> {
        let payload = serde_json::to_vec(frame)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
        writer.write_all(&payload).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Route a reply frame to whoever is waiting on its id.
    pub fn resolve_reply(
        &self,
        id: u64,
        ok: bool,
        error: Option<String>,
        proxy: Option<ProxyDescriptor>,
    ) {
        match self.pending.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(Reply { ok, error, proxy });
            }
            None => debug!("Dropping reply for unknown id {}", id),
        }
    }

    fn claim_id(&self) -> (u64, tokio::sync::oneshot::Receiver<Reply>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.pending.lock().insert(id, tx);
        (id, rx)
    }

    /// Send a correlated frame and await the extension's reply.
    async fn call(&self, build: impl FnOnce(u64) -> Outbound) -> Result<Reply> {
        let (id, rx) = self.claim_id();
        if let Err(e) = self.send(&build(id)).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(reply)) if reply.ok => Ok(reply),
            Ok(Ok(reply)) => Err(ProxydeckError::Backend(
                reply.error.unwrap_or_else(|| "rejected by host".to_string()),
            )),
            Ok(Err(_)) => Err(ProxydeckError::Backend("bridge closed".to_string())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(ProxydeckError::Backend(format!(
                    "host did not reply within {:?}",
                    REPLY_TIMEOUT
                )))
            }
        }
    }
}

#[async_trait]
impl ProxyBackend for HostBridge {
    async fn set_proxy(&self, descriptor: &ProxyDescriptor) -> Result<()> {
        self.call(|id| Outbound::SetProxy {
            id,
            descriptor: descriptor.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn current_proxy(&self) -> Result<ProxyDescriptor> {
        let reply = self.call(|id| Outbound::GetProxy { id }).await?;
        reply
            .proxy
            .ok_or_else(|| ProxydeckError::Backend("host reply carried no proxy state".to_string()))
    }

    async fn install_auth(&self, auth: &ProxyAuth) -> Result<()> {
        self.call(|id| Outbound::InstallAuth {
            id,
            auth: auth.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn set_badge(&self, text: &str) -> Result<()> {
        // Fire and forget; the badge is cosmetic
        self.send(&Outbound::SetBadge {
            text: text.to_string(),
        })
        .await
    }

    async fn notify(&self, message: &str) -> Result<()> {
        self.send(&Outbound::Notify {
            message: message.to_string(),
        })
        .await
    }
}

/// Read the next well-formed length-prefixed frame; `None` on clean EOF.
/// Malformed frames are logged and skipped, not fatal.
pub async fn read_frame(reader: &mut (impl AsyncRead + Unpin)) -> Result<Option<Inbound>> {
    loop {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;

        match serde_json::from_slice(&payload) {
            Ok(frame) => return Ok(Some(frame)),
            Err(e) => warn!("Dropping malformed frame ({} bytes): {}", len, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxydeck_core::types::ProxyScheme;

    async fn write_raw(writer: &mut (impl AsyncWrite + Unpin), json: &str) {
        writer
            .write_all(&(json.len() as u32).to_le_bytes())
            .await
            .unwrap();
        writer.write_all(json.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_frame_round_trip() {
        let (mut tx, mut rx) = tokio::io::duplex(4096);
        write_raw(
            &mut tx,
            r#"{"kind":"tab","event":{"event":"navigation","tab_id":7,"url":"https://example.com/"}}"#,
        )
        .await;

        match read_frame(&mut rx).await.unwrap().unwrap() {
            Inbound::Tab {
                event: TabEvent::Navigation { tab_id, url },
            } => {
                assert_eq!(tab_id, 7);
                assert_eq!(url, "https://example.com/");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let (mut tx, mut rx) = tokio::io::duplex(4096);
        write_raw(&mut tx, "this is not json").await;
        write_raw(&mut tx, r#"{"kind":"tab","event":{"event":"created","tab_id":1}}"#).await;

        match read_frame(&mut rx).await.unwrap().unwrap() {
            Inbound::Tab {
                event: TabEvent::Created { tab_id },
            } => assert_eq!(tab_id, 1),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_frame_eof_is_none() {
        let (tx, mut rx) = tokio::io::duplex(64);
        drop(tx);
        assert!(read_frame(&mut rx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_proxy_waits_for_reply() {
        let (client, mut server) = tokio::io::duplex(4096);
        let bridge = std::sync::Arc::new(HostBridge::new(client));

        let call = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .set_proxy(&ProxyDescriptor::Fixed {
                        scheme: ProxyScheme::Http,
                        host: "proxy.internal".to_string(),
                        port: 3128,
                    })
                    .await
            })
        };

        // Read the outbound frame the bridge wrote and extract its id
        let mut len_bytes = [0u8; 4];
        server.read_exact(&mut len_bytes).await.unwrap();
        let mut payload = vec![0u8; u32::from_le_bytes(len_bytes) as usize];
        server.read_exact(&mut payload).await.unwrap();
        let frame: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(frame["kind"], "set_proxy");
        assert_eq!(frame["descriptor"]["mode"], "fixed");
        let id = frame["id"].as_u64().unwrap();

        bridge.resolve_reply(id, true, None, None);
        call.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_rejected_reply_becomes_backend_error() {
        let (client, mut server) = tokio::io::duplex(4096);
        let bridge = std::sync::Arc::new(HostBridge::new(client));

        let call = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.current_proxy().await })
        };

        let mut len_bytes = [0u8; 4];
        server.read_exact(&mut len_bytes).await.unwrap();
        let mut payload = vec![0u8; u32::from_le_bytes(len_bytes) as usize];
        server.read_exact(&mut payload).await.unwrap();
        let frame: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        let id = frame["id"].as_u64().unwrap();

        bridge.resolve_reply(id, false, Some("denied".to_string()), None);
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, ProxydeckError::Backend(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_reply_for_unknown_id_is_dropped() {
        let (client, _server) = tokio::io::duplex(64);
        let bridge = HostBridge::new(client);
        // Must not panic or leak
        bridge.resolve_reply(42, true, None, None);
    }
}
