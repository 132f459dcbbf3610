//! # Worker Thread Backend
//!
//! Runs a [`SqliteEngine`] on a dedicated OS thread and talks to it over an
//! in-process channel.
//!
//! ```text
//!   async callers                       litedit-engine thread
//!   ─────────────                       ─────────────────────
//!   RpcProxy::call ──► ChannelPort ──► mpsc (bounded) ──► blocking_recv()
//!        ▲                                                    │
//!        │                                        RpcHandler::handle(&mut engine)
//!        │                                                    │
//!   Inbox::deliver ◄──────────────────────────────────────────┘
//! ```
//!
//! ## Rust Pattern: Thread-Owned State
//!
//! The engine's connection is `!Sync` and every operation on it is
//! synchronous. Giving it to one thread that drains a queue means no locking
//! around SQLite, and calls are processed strictly in arrival order.
//!
//! Buffers in messages are moved through the channel, never copied, so a
//! transfer argument costs nothing extra here.
//!
//! ## Shutdown
//!
//! Dropping the [`WorkerDatabase`] drops the proxy and with it the channel's
//! only sender. The thread sees the channel close, shuts the engine down if
//! it is still open, and fails any call still waiting with
//! [`Error::ChannelClosed`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::RpcConfig;
use crate::engine::SqliteEngine;
use crate::error::{Error, Result};
use crate::operations::DatabaseOperations;
use crate::remote::{engine_handler, forward_operations, RemoteDatabase, ENGINE_METHODS};
use crate::rpc::{Inbox, Message, Port, RpcProxy};

/// Capacity of the queue in front of the engine thread.
///
/// A full queue makes `post` wait, which is the backpressure we want when a
/// caller floods the engine with edits.
const COMMAND_CHANNEL_SIZE: usize = 64;

/// Name given to the engine thread.
const THREAD_NAME: &str = "litedit-engine";

// =============================================================================
// Port
// =============================================================================

/// Sends messages to the engine thread.
struct ChannelPort {
    tx: mpsc::Sender<Message>,
}

#[async_trait]
impl Port for ChannelPort {
    async fn post(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| Error::ChannelClosed("engine thread has stopped".to_string()))
    }
}

// =============================================================================
// Worker Database
// =============================================================================

/// A [`DatabaseOperations`] backend whose engine lives on its own thread.
pub struct WorkerDatabase {
    remote: RemoteDatabase,
}

impl WorkerDatabase {
    /// Starts the engine thread.
    ///
    /// The engine starts uninitialized; open it with `create_database`,
    /// `load_database` or `open_file`.
    pub fn spawn(config: RpcConfig) -> Result<Self> {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let proxy = RpcProxy::new(ENGINE_METHODS.iter().copied(), ChannelPort { tx }, config);
        let inbox = proxy.inbox();

        std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run_engine_thread(rx, inbox))?;

        info!(thread = THREAD_NAME, "engine worker started");
        Ok(Self {
            remote: RemoteDatabase::new(proxy),
        })
    }

    /// Number of calls waiting for a result.
    pub fn pending_calls(&self) -> usize {
        self.remote.proxy().pending_count()
    }
}

forward_operations!(WorkerDatabase, remote);

/// The engine thread's main loop.
fn run_engine_thread(mut rx: mpsc::Receiver<Message>, inbox: Inbox) {
    let handler = engine_handler();
    let mut engine = SqliteEngine::new();
    debug!("engine thread running");

    while let Some(message) = rx.blocking_recv() {
        if let Some(reply) = handler.handle(&mut engine, message) {
            inbox.deliver(reply);
        }
    }

    if engine.is_open() {
        let _ = engine.shutdown();
    }
    inbox.close("engine thread stopped");
    debug!("engine thread exited");
}

// =============================================================================
// Tests
// =============================================================================
