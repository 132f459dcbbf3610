//! # Native Process Backend
//!
//! Runs the engine in a separate `litedit-worker` process. Requests and
//! replies are [`codec`](crate::codec) frames on the child's stdin and stdout;
//! the child's stderr is inherited so its logs land next to ours.
//!
//! ```text
//!   RpcProxy ──► FramePort ──write_frame──► child stdin ──► serve_engine()
//!                                                                 │
//!   Inbox ◄── reader task ◄──read_frame── child stdout ◄──────────┘
//! ```
//!
//! The process is killed when the [`NativeDatabase`] is dropped. Use
//! [`NativeDatabase::close`] for an orderly exit.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use crate::codec::{read_frame, write_frame};
use crate::config::RpcConfig;
use crate::engine::SqliteEngine;
use crate::error::{Error, Result};
use crate::operations::DatabaseOperations;
use crate::remote::{engine_handler, forward_operations, RemoteDatabase, ENGINE_METHODS};
use crate::rpc::{Message, Port, RpcProxy};

/// How long [`NativeDatabase::close`] waits for the child to exit by itself.
const EXIT_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// Serving Side
// =============================================================================

/// Serves engine calls from `reader` until end of stream or shutdown.
///
/// This is the body of the `litedit-worker` binary. Calls are handled one at
/// a time in arrival order. The loop ends cleanly when the reader closes or
/// after a `shutdown` call has closed the engine.
pub async fn serve_engine<R, W>(reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let handler = engine_handler();
    let mut engine = SqliteEngine::new();

    while let Some(message) = read_frame(&mut reader).await? {
        if let Some(reply) = handler.handle(&mut engine, message) {
            write_frame(&mut writer, &reply).await?;
        }
        if engine.is_closed() {
            debug!("engine shut down; leaving serve loop");
            break;
        }
    }

    if engine.is_open() {
        let _ = engine.shutdown();
    }
    Ok(())
}

// =============================================================================
// Calling Side
// =============================================================================

/// Writes frames to the child's stdin.
///
/// Concurrent calls each write a whole frame under the lock, so frames never
/// interleave.
struct FramePort {
    stdin: tokio::sync::Mutex<ChildStdin>,
}

#[async_trait]
impl Port for FramePort {
    async fn post(&self, message: Message) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        write_frame(&mut *stdin, &message)
            .await
            .map_err(|e| Error::ChannelClosed(format!("worker stdin: {e}")))
    }
}

/// A [`DatabaseOperations`] backend whose engine runs in a child process.
pub struct NativeDatabase {
    remote: RemoteDatabase,
    child: tokio::sync::Mutex<Child>,
    health_check_timeout: Duration,
}

impl NativeDatabase {
    /// Launches `program` and connects to it.
    ///
    /// Must be called from within a tokio runtime; the reply reader runs as a
    /// spawned task.
    pub fn spawn(program: &Path, config: RpcConfig, health_check_timeout: Duration) -> Result<Self> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ChannelClosed("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ChannelClosed("worker stdout unavailable".to_string()))?;

        let port = FramePort {
            stdin: tokio::sync::Mutex::new(stdin),
        };
        let proxy = RpcProxy::new(ENGINE_METHODS.iter().copied(), port, config);
        let inbox = proxy.inbox();

        tokio::spawn(async move {
            let mut stdout = BufReader::new(stdout);
            loop {
                match read_frame(&mut stdout).await {
                    Ok(Some(message)) => inbox.deliver(message),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "worker output stream failed");
                        break;
                    }
                }
            }
            inbox.close("worker process exited");
        });

        info!(program = %program.display(), pid = child.id(), "native worker started");
        Ok(Self {
            remote: RemoteDatabase::new(proxy),
            child: tokio::sync::Mutex::new(child),
            health_check_timeout,
        })
    }

    /// Pings the worker. Any error or a reply slower than the health-check
    /// timeout counts as unhealthy.
    pub async fn health_check(&self) -> bool {
        match tokio::time::timeout(self.health_check_timeout, self.remote.ping()).await {
            Ok(Ok(alive)) => alive,
            Ok(Err(e)) => {
                warn!(error = %e, "health check failed");
                false
            }
            Err(_) => {
                warn!(
                    after_ms = self.health_check_timeout.as_millis() as u64,
                    "health check timed out"
                );
                false
            }
        }
    }

    /// OS process id, while the child is running.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.id()
    }

    /// Kills the worker immediately.
    pub async fn kill(&self) -> Result<()> {
        self.child.lock().await.kill().await?;
        Ok(())
    }

    /// Asks the engine to shut down, then waits briefly for the process to
    /// exit before killing it.
    pub async fn close(&self) -> Result<()> {
        if let Err(e) = self.remote.shutdown().await {
            debug!(error = %e, "shutdown before close");
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(%status, "native worker exited");
                Ok(())
            }
            Err(_) => {
                warn!("native worker did not exit; killing it");
                child.kill().await?;
                Ok(())
            }
        }
    }
}

forward_operations!(NativeDatabase, remote);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Envelope;

    /// Drives `serve_engine` over in-memory pipes, the way the binary does
    /// over stdio.
    async fn round_trip(inbox_side: &mut tokio::io::DuplexStream, method: &str) -> Envelope {
        let message = Message::new(
            &Envelope::Invoke {
                correlation_id: format!("t-{method}"),
                method_name: method.into(),
                parameters: vec![],
            },
            vec![],
        )
        .unwrap();
        write_frame(inbox_side, &message).await.unwrap();
        read_frame(inbox_side).await.unwrap().unwrap().decode().unwrap().0
    }

    #[tokio::test]
    async fn test_serve_loop_ends_after_shutdown() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let serving = tokio::spawn(serve_engine(server_read, server_write));

        let reply = round_trip(&mut client, "createDatabase").await;
        assert!(matches!(reply, Envelope::Result { error_text: None, .. }));
        assert_eq!(reply.correlation_id(), "t-createDatabase");

        let reply = round_trip(&mut client, "constructor").await;
        assert!(matches!(reply, Envelope::Result { error_text: Some(ref t), .. } if t == "unknown method: constructor"));

        round_trip(&mut client, "shutdown").await;
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_loop_ends_on_eof() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        drop(client);
        serve_engine(server_read, server_write).await.unwrap();
    }
}
