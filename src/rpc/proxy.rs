//! Outbound side: turns method calls into invoke envelopes and waits for
//! the matching result.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::envelope::{pack_args, Arg, Envelope, Message, Payload};
use crate::config::RpcConfig;
use crate::error::{Error, Result};

// =============================================================================
// Port
// =============================================================================

/// The sending half of a message channel.
///
/// The receiving half belongs to whoever reads replies; it hands them to the
/// proxy's [`Inbox`].
#[async_trait]
pub trait Port: Send + Sync {
    async fn post(&self, message: Message) -> Result<()>;

    /// Whether buffers can travel next to the JSON. When false, the proxy
    /// copies them inline as base64 instead. When true but a post carrying
    /// buffers fails, the proxy resends that one message inline.
    fn supports_transfer(&self) -> bool {
        true
    }
}

// =============================================================================
// Pending Registry
// =============================================================================

type PendingReply = oneshot::Sender<Result<Payload>>;

/// Calls waiting for a result, keyed by correlation id.
///
/// Replies are delivered from a listener thread or task while callers wait
/// on other threads, so the map sits behind a mutex.
#[derive(Default)]
struct Registry {
    calls: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
    waiting: HashMap<String, PendingReply>,

    /// Set once the listener has closed; new calls fail immediately.
    closed: Option<String>,
}

impl Registry {
    fn take(&self, correlation_id: &str) -> Option<PendingReply> {
        self.calls.lock().waiting.remove(correlation_id)
    }
}

/// Removes a pending entry when the call finishes, times out or is dropped.
struct PendingGuard<'a> {
    registry: &'a Registry,
    correlation_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.take(&self.correlation_id);
    }
}

/// Handle for delivering replies to a proxy.
///
/// Holds only the pending registry, so a listener keeping an `Inbox` does
/// not keep the proxy (and its port) alive.
#[derive(Clone)]
pub struct Inbox {
    registry: Arc<Registry>,
}

impl Inbox {
    /// Routes a result envelope to its waiting call.
    pub fn deliver(&self, message: Message) {
        let correlation_id = message.correlation_id().map(str::to_string);

        match message.decode() {
            Ok((
                Envelope::Result {
                    correlation_id,
                    payload,
                    error_text,
                },
                buffers,
            )) => {
                let Some(reply) = self.registry.take(&correlation_id) else {
                    debug!(%correlation_id, "result for unknown or expired call");
                    return;
                };
                let outcome = match error_text {
                    Some(text) => Err(Error::Remote(text)),
                    None => Ok(Payload {
                        value: payload.unwrap_or_default(),
                        buffers,
                    }),
                };
                let _ = reply.send(outcome);
            }
            Ok((Envelope::Invoke { method_name, .. }, _)) => {
                warn!(method = %method_name, "proxy received an invoke envelope; ignored");
            }
            Err(e) => {
                let reply = correlation_id.and_then(|id| self.registry.take(&id));
                match reply {
                    Some(reply) => {
                        let _ = reply.send(Err(e));
                    }
                    None => warn!(error = %e, "dropping malformed envelope"),
                }
            }
        }
    }

    /// Fails every pending call, e.g. when the remote side exited. Calls made
    /// afterwards fail with the same reason without being sent.
    pub fn close(&self, reason: &str) {
        let drained: Vec<PendingReply> = {
            let mut pending = self.registry.calls.lock();
            pending.closed = Some(reason.to_string());
            pending.waiting.drain().map(|(_, r)| r).collect()
        };
        if !drained.is_empty() {
            warn!(pending = drained.len(), reason, "failing pending calls");
        }
        for reply in drained {
            let _ = reply.send(Err(Error::ChannelClosed(reason.to_string())));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.registry.calls.lock().waiting.len()
    }
}

// =============================================================================
// Proxy
// =============================================================================

/// Client stub for a remote method table.
///
/// Only the method names given at construction can be called; anything else
/// fails locally with [`Error::UnknownMethod`] without touching the channel.
pub struct RpcProxy {
    methods: HashSet<String>,
    port: Box<dyn Port>,
    registry: Arc<Registry>,
    config: RpcConfig,
    seed: String,
    counter: AtomicU64,
}

impl RpcProxy {
    pub fn new<I, S>(methods: I, port: impl Port + 'static, config: RpcConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
            port: Box::new(port),
            registry: Arc::new(Registry::default()),
            config,
            seed: format!("{millis:x}"),
            counter: AtomicU64::new(0),
        }
    }

    /// Returns the handle a listener uses to deliver replies.
    pub fn inbox(&self) -> Inbox {
        Inbox {
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.registry.calls.lock().waiting.len()
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.registry.calls.lock().waiting.contains_key(correlation_id)
    }

    fn next_correlation_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n}", self.seed)
    }

    /// Invokes a remote method and waits for its result.
    pub async fn call(&self, method: &str, args: Vec<Arg>) -> Result<Payload> {
        if !self.methods.contains(method) {
            return Err(Error::UnknownMethod(method.to_string()));
        }

        let correlation_id = self.next_correlation_id();
        let (parameters, buffers) = pack_args(args);
        let mut message = Message::new(
            &Envelope::Invoke {
                correlation_id: correlation_id.clone(),
                method_name: method.to_string(),
                parameters,
            },
            buffers,
        )?;
        let transfers = self.port.supports_transfer();
        if !transfers {
            message = message.inline_transfers();
        }
        // a port may still refuse a particular transfer; keep a copy to resend inline
        let fallback = (transfers && !message.buffers.is_empty()).then(|| message.clone());

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.registry.calls.lock();
            if let Some(reason) = &pending.closed {
                return Err(Error::ChannelClosed(reason.clone()));
            }
            pending.waiting.insert(correlation_id.clone(), tx);
        }
        let _guard = PendingGuard {
            registry: &self.registry,
            correlation_id: correlation_id.clone(),
        };

        debug!(method, %correlation_id, "invoke");
        if let Err(e) = self.port.post(message).await {
            let Some(fallback) = fallback else {
                return Err(e);
            };
            warn!(method, %correlation_id, error = %e, "transfer refused; resending inline");
            self.port.post(fallback.inline_transfers()).await?;
        }

        match tokio::time::timeout(self.config.call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ChannelClosed(format!("no reply for {method}"))),
            Err(_) => {
                let after_ms = self.config.call_timeout.as_millis() as u64;
                warn!(method, %correlation_id, after_ms, "call timed out");
                Err(Error::Timeout {
                    method: method.to_string(),
                    after_ms,
                })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
