//! # RPC Transport
//!
//! A correlation-id request/response protocol over any asynchronous message
//! channel. The document controller talks to the engine through it, whether
//! the engine sits on another thread or in another process.
//!
//! ```text
//!  caller                                               engine side
//!  ──────                                               ───────────
//!  RpcProxy::call("insertRow", args)
//!    │ id = "18f3a2c-7"
//!    │ registry[id] = oneshot
//!    │ Port::post ──── invoke {id, methodName, parameters} ────►  RpcHandler::handle
//!    │                                                              │ table lookup
//!    │ (awaits, 30s timeout)                                        │ method(&mut engine, args)
//!    │                                                              ▼
//!  Inbox::deliver ◄──── result {id, payload | errorText} ───────  reply
//!    │ registry.remove(id) → oneshot.send
//!    ▼
//!  Ok(Payload) / Err(Remote(text))
//! ```
//!
//! ## Guarantees
//!
//! - A call resolves exactly once: with its result, with
//!   [`Error::Timeout`](crate::Error::Timeout) after the configured timeout,
//!   or with [`Error::ChannelClosed`](crate::Error::ChannelClosed) when the
//!   listener shuts the inbox. In every case its registry entry is removed.
//! - A handler replies to every invoke, including unknown methods, bad
//!   arguments and panics. Malformed envelopes with a readable correlation id
//!   also get an error reply.
//! - Errors cross the boundary as text only.
//!
//! ## Binary Payloads
//!
//! Wrap bytes in [`Transfer`] to move them through the message's buffer list
//! instead of encoding them into the JSON. If the [`Port`] cannot carry
//! buffers, the proxy falls back to an inline base64 copy. Receivers accept
//! both forms.

mod envelope;
mod handler;
mod proxy;

pub use envelope::{Arg, Args, Envelope, Message, Payload, Transfer, TRANSFER_KEY};
pub use handler::RpcHandler;
pub use proxy::{Inbox, Port, RpcProxy};
