//! Per-shard connection management
//!
//! One channel per shard. A channel starts in `Connecting`, becomes `Ready`
//! once the `quai_chainId` handshake answers, and ends `Closed`. Writes to a
//! shard wait for readiness with capped exponential backoff.

use super::rpc::{parse_running_chains, JsonRpcRequest, JsonRpcResponse};
use super::transport::{Connector, EventReceiver, EventSender, Transport, TransportEvent, CLOSE_NORMAL};
use crate::config::NetworkConfig;
use crate::error::WalletError;
use crate::zone::Shard;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Ready,
    Closed,
}

pub struct ShardChannel {
    pub shard: Shard,
    transport: Arc<dyn Transport>,
    pub state: ChannelState,
}

type PendingReply = oneshot::Sender<Result<Value, WalletError>>;

struct Inner {
    config: NetworkConfig,
    connector: Arc<dyn Connector>,
    channels: RwLock<HashMap<Shard, ShardChannel>>,
    pending: Mutex<HashMap<u64, (Shard, PendingReply)>>,
    next_id: AtomicU64,
    destroyed: AtomicBool,
    events: EventSender,
}

/// Handle to the set of shard channels. Cloning shares the same channels.
#[derive(Clone)]
pub struct ShardConnectionManager {
    inner: Arc<Inner>,
}

impl ShardConnectionManager {
    /// Creates a manager with no channels and starts its event loop.
    pub fn new(config: NetworkConfig, connector: Arc<dyn Connector>) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            config,
            connector,
            channels: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
            events,
        });
        tokio::spawn(run_events(Arc::downgrade(&inner), receiver));
        ShardConnectionManager { inner }
    }

    /// Opens the prime channel, waits for it, then opens one channel per
    /// running shard reported by the node.
    pub async fn connect(config: NetworkConfig, connector: Arc<dyn Connector>) -> Result<Self, WalletError> {
        let manager = Self::new(config, connector);
        manager.open(Shard::Prime).await?;
        manager.wait_ready(Shard::Prime).await?;

        let running = manager
            .request(Shard::Prime, "quai_listRunningChains", json!([]))
            .await?;
        for shard in parse_running_chains(&running)? {
            manager.open(shard).await?;
        }
        info!(shards = manager.shards().await.len(), "shard connections opened");
        Ok(manager)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    /// Opens a channel to `shard` unless one already exists.
    pub async fn open(&self, shard: Shard) -> Result<(), WalletError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(WalletError::ChannelClosed(shard.to_string()));
        }
        let mut channels = self.inner.channels.write().await;
        if channels.contains_key(&shard) {
            return Ok(());
        }
        let url = self.inner.config.url_for(shard);
        debug!(shard = %shard, %url, "opening channel");
        let transport = self
            .inner
            .connector
            .connect(shard, &url, self.inner.events.clone())?;
        channels.insert(
            shard,
            ShardChannel {
                shard,
                transport,
                state: ChannelState::Connecting,
            },
        );
        Ok(())
    }

    pub async fn shards(&self) -> Vec<Shard> {
        let mut shards: Vec<Shard> = self.inner.channels.read().await.keys().copied().collect();
        shards.sort();
        shards
    }

    pub async fn state(&self, shard: Shard) -> Option<ChannelState> {
        self.inner
            .channels
            .read()
            .await
            .get(&shard)
            .map(|channel| channel.state)
    }

    pub async fn is_ready(&self, shard: Shard) -> bool {
        self.state(shard).await == Some(ChannelState::Ready)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Waits until `shard` is ready, sleeping `base * 2^attempt` between
    /// checks for at most `max_ready_attempts` sleeps.
    pub async fn wait_ready(&self, shard: Shard) -> Result<Arc<dyn Transport>, WalletError> {
        self.inner.wait_ready(shard).await
    }

    /// Sends `payload` on the channel of `shard` once it is ready.
    pub async fn write(&self, shard: Shard, payload: String) -> Result<(), WalletError> {
        let transport = self.wait_ready(shard).await?;
        transport.send(payload)
    }

    /// JSON-RPC call on `shard`, correlated by request id.
    pub async fn request(&self, shard: Shard, method: &str, params: Value) -> Result<Value, WalletError> {
        let transport = self.wait_ready(shard).await?;
        self.inner.call(&transport, shard, method, params).await
    }

    /// Closes every channel. Later writes fail with `ChannelClosed`.
    pub async fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);
        let mut channels = self.inner.channels.write().await;
        for (shard, channel) in channels.drain() {
            if let Err(e) = channel.transport.close(Some(CLOSE_NORMAL), Some("destroyed")) {
                debug!(shard = %shard, "close on dead transport: {}", e);
            }
        }
        drop(channels);

        let pending: Vec<_> = self.inner.pending.lock().drain().collect();
        for (_, (shard, reply)) in pending {
            let _ = reply.send(Err(WalletError::ChannelClosed(shard.to_string())));
        }
        info!("shard connections destroyed");
    }
}

impl Inner {
    async fn wait_ready(&self, shard: Shard) -> Result<Arc<dyn Transport>, WalletError> {
        let max_attempts = self.config.max_ready_attempts;
        for attempt in 0..=max_attempts {
            if self.destroyed.load(Ordering::SeqCst) {
                return Err(WalletError::ChannelClosed(shard.to_string()));
            }
            {
                let channels = self.channels.read().await;
                let channel = channels.get(&shard).ok_or_else(|| {
                    WalletError::NetworkError(format!("No channel open for shard {}", shard))
                })?;
                match channel.state {
                    ChannelState::Ready => return Ok(Arc::clone(&channel.transport)),
                    ChannelState::Closed => {
                        return Err(WalletError::ChannelClosed(shard.to_string()))
                    }
                    ChannelState::Connecting => {}
                }
            }
            if attempt == max_attempts {
                break;
            }
            let delay = self
                .config
                .base_backoff_ms
                .saturating_mul(1u64 << attempt.min(32));
            debug!(shard = %shard, attempt, delay_ms = delay, "shard not ready, backing off");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        warn!(shard = %shard, attempts = max_attempts, "shard never became ready");
        Err(WalletError::Timeout(shard.to_string()))
    }

    async fn call(
        &self,
        transport: &Arc<dyn Transport>,
        shard: Shard,
        method: &str,
        params: Value,
    ) -> Result<Value, WalletError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        let (reply, response) = oneshot::channel();
        self.pending.lock().insert(id, (shard, reply));

        if let Err(e) = transport.send(payload) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.request_timeout(), response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WalletError::ChannelClosed(shard.to_string())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(WalletError::NetworkError(format!(
                    "{} on shard {} timed out",
                    method, shard
                )))
            }
        }
    }

    async fn set_state(&self, shard: Shard, state: ChannelState) {
        if let Some(channel) = self.channels.write().await.get_mut(&shard) {
            channel.state = state;
        }
    }

    fn resolve(&self, text: &str) {
        let response: JsonRpcResponse = match serde_json::from_str(text) {
            Ok(response) => response,
            Err(e) => {
                debug!("ignoring unparseable message: {}", e);
                return;
            }
        };
        let Some(id) = response.id else {
            return;
        };
        if let Some((_, reply)) = self.pending.lock().remove(&id) {
            let _ = reply.send(response.into_result());
        }
    }

    fn fail_pending(&self, shard: Shard) {
        let mut pending = self.pending.lock();
        let ids: Vec<u64> = pending
            .iter()
            .filter(|(_, (s, _))| *s == shard)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some((_, reply)) = pending.remove(&id) {
                let _ = reply.send(Err(WalletError::ChannelClosed(shard.to_string())));
            }
        }
    }
}

/// Handshake run when a transport opens: the shard is ready once it
/// answers `quai_chainId`.
async fn handshake(inner: Arc<Inner>, shard: Shard) {
    let transport = {
        let channels = inner.channels.read().await;
        match channels.get(&shard) {
            Some(channel) => Arc::clone(&channel.transport),
            None => return,
        }
    };
    match inner.call(&transport, shard, "quai_chainId", json!([])).await {
        Ok(chain_id) => {
            inner.set_state(shard, ChannelState::Ready).await;
            info!(shard = %shard, %chain_id, "shard ready");
        }
        Err(e) => warn!(shard = %shard, "handshake failed: {}", e),
    }
}

async fn run_events(inner: Weak<Inner>, mut receiver: EventReceiver) {
    while let Some((shard, event)) = receiver.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            TransportEvent::Open => {
                debug!(shard = %shard, "transport open");
                tokio::spawn(handshake(inner, shard));
            }
            TransportEvent::Message(text) => inner.resolve(&text),
            TransportEvent::Error(e) => warn!(shard = %shard, "transport error: {}", e),
            TransportEvent::Closed { code, reason } => {
                info!(shard = %shard, ?code, %reason, "transport closed");
                inner.set_state(shard, ChannelState::Closed).await;
                inner.fail_pending(shard);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::Zone;
    use std::collections::HashSet;

    /// Answers every request immediately; shards in `silent` never open.
    struct EchoTransport {
        shard: Shard,
        events: EventSender,
    }

    impl Transport for EchoTransport {
        fn send(&self, payload: String) -> Result<(), WalletError> {
            let request: JsonRpcRequest = serde_json::from_str(&payload)?;
            let result = match request.method.as_str() {
                "quai_chainId" => json!("0x2328"),
                "quai_listRunningChains" => json!([[0, 0], [1, 2]]),
                _ => Value::Null,
            };
            let reply = json!({"jsonrpc": "2.0", "id": request.id, "result": result});
            let _ = self
                .events
                .send((self.shard, TransportEvent::Message(reply.to_string())));
            Ok(())
        }

        fn close(&self, _code: Option<u16>, _reason: Option<&str>) -> Result<(), WalletError> {
            Ok(())
        }
    }

    struct EchoConnector {
        silent: HashSet<Shard>,
    }

    impl Connector for EchoConnector {
        fn connect(&self, shard: Shard, _url: &str, events: EventSender) -> Result<Arc<dyn Transport>, WalletError> {
            if !self.silent.contains(&shard) {
                let _ = events.send((shard, TransportEvent::Open));
            }
            Ok(Arc::new(EchoTransport { shard, events }))
        }
    }

    fn fast_config() -> NetworkConfig {
        NetworkConfig {
            max_ready_attempts: 5,
            base_backoff_ms: 5,
            request_timeout_ms: 500,
            ..NetworkConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_discovers_shards() {
        let connector = Arc::new(EchoConnector {
            silent: HashSet::new(),
        });
        let manager = ShardConnectionManager::connect(fast_config(), connector)
            .await
            .unwrap();
        assert_eq!(
            manager.shards().await,
            vec![
                Shard::Prime,
                Shard::Zone(Zone::Cyprus1),
                Shard::Zone(Zone::Paxos3)
            ]
        );
        let result = manager
            .request(Shard::Zone(Zone::Paxos3), "quai_chainId", json!([]))
            .await
            .unwrap();
        assert_eq!(result, json!("0x2328"));
        assert!(manager.is_ready(Shard::Zone(Zone::Paxos3)).await);
        assert!(manager.is_ready(Shard::Prime).await);
    }

    #[tokio::test]
    async fn test_silent_shard_times_out() {
        let connector = Arc::new(EchoConnector {
            silent: [Shard::Zone(Zone::Cyprus1)].into_iter().collect(),
        });
        let manager = ShardConnectionManager::new(fast_config(), connector);
        manager.open(Shard::Zone(Zone::Cyprus1)).await.unwrap();
        let result = manager
            .write(Shard::Zone(Zone::Cyprus1), "{}".to_string())
            .await;
        assert!(matches!(result, Err(WalletError::Timeout(_))));
        assert_eq!(
            manager.state(Shard::Zone(Zone::Cyprus1)).await,
            Some(ChannelState::Connecting)
        );
    }

    #[tokio::test]
    async fn test_destroy_fails_fast() {
        let connector = Arc::new(EchoConnector {
            silent: HashSet::new(),
        });
        let manager = ShardConnectionManager::connect(fast_config(), connector)
            .await
            .unwrap();
        manager.destroy().await;
        assert!(manager.is_destroyed());
        assert!(manager.shards().await.is_empty());
        let result = manager
            .write(Shard::Zone(Zone::Cyprus1), "{}".to_string())
            .await;
        assert!(matches!(result, Err(WalletError::ChannelClosed(_))));
        assert!(manager.open(Shard::Prime).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_shard_is_not_retried() {
        let connector = Arc::new(EchoConnector {
            silent: HashSet::new(),
        });
        let manager = ShardConnectionManager::new(fast_config(), connector);
        let result = manager.write(Shard::Zone(Zone::Hydra1), "{}".to_string()).await;
        assert!(matches!(result, Err(WalletError::NetworkError(_))));
    }
}
