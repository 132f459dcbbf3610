//! Inbound side: dispatches invoke envelopes to a closed method table.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use super::envelope::{Args, Envelope, Message, Payload};
use crate::error::{Error, Result};

type Method<C> = Box<dyn Fn(&mut C, Args) -> Result<Payload> + Send + Sync>;

/// A method table over some context `C` (for the engine, `SqliteEngine`).
///
/// # Rust Pattern: Closed Dispatch Table
///
/// The table holds only the entries registered through
/// [`register`](Self::register). Lookup is a plain map lookup, so names like
/// `constructor`, `toString` or `__proto__` are simply absent and produce an
/// "unknown method" result like any other unregistered name.
pub struct RpcHandler<C> {
    methods: HashMap<&'static str, Method<C>>,
}

impl<C> Default for RpcHandler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> RpcHandler<C> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Exposes `method` under `name`.
    pub fn register<F>(mut self, name: &'static str, method: F) -> Self
    where
        F: Fn(&mut C, Args) -> Result<Payload> + Send + Sync + 'static,
    {
        self.methods.insert(name, Box::new(method));
        self
    }

    /// Names of every registered method, sorted.
    pub fn method_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.methods.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Processes one incoming message.
    ///
    /// Every invoke gets a result, success or error text. A malformed envelope
    /// gets an error result if its correlation id can be read, so the caller
    /// does not wait for a timeout. Result envelopes are not for a handler
    /// and are dropped.
    pub fn handle(&self, context: &mut C, message: Message) -> Option<Message> {
        let raw_id = message.correlation_id().map(str::to_string);

        let (envelope, buffers) = match message.decode() {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "malformed envelope");
                return raw_id.and_then(|id| reply(Envelope::failure(id, e.to_string()), vec![]));
            }
        };

        let (correlation_id, method_name, parameters) = match envelope {
            Envelope::Invoke {
                correlation_id,
                method_name,
                parameters,
            } => (correlation_id, method_name, parameters),
            Envelope::Result { correlation_id, .. } => {
                warn!(%correlation_id, "handler received a result envelope; ignored");
                return None;
            }
        };

        let Some(method) = self.methods.get(method_name.as_str()) else {
            warn!(method = %method_name, "unknown method");
            let err = Error::UnknownMethod(method_name);
            return reply(Envelope::failure(correlation_id, err.to_string()), vec![]);
        };

        debug!(method = %method_name, %correlation_id, "dispatch");
        let args = Args::new(parameters, buffers);
        let outcome = catch_unwind(AssertUnwindSafe(|| method(context, args)))
            .unwrap_or_else(|_| Err(Error::Remote(format!("{method_name} panicked"))));

        match outcome {
            Ok(payload) => reply(Envelope::success(correlation_id, payload.value), payload.buffers),
            Err(e) => {
                debug!(method = %method_name, error = %e, "method failed");
                reply(Envelope::failure(correlation_id, e.to_string()), vec![])
            }
        }
    }
}

fn reply(envelope: Envelope, buffers: Vec<Vec<u8>>) -> Option<Message> {
    match Message::new(&envelope, buffers) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, "failed to encode reply");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter_handler() -> RpcHandler<i64> {
        RpcHandler::new()
            .register("add", |total: &mut i64, args: Args| {
                *total += args.get::<i64>(0)?;
                Payload::json(&*total)
            })
            .register("explode", |_: &mut i64, _: Args| panic!("boom"))
    }

    fn invoke(method: &str, parameters: Vec<serde_json::Value>) -> Message {
        Message::new(
            &Envelope::Invoke {
                correlation_id: "id-1".into(),
                method_name: method.into(),
                parameters,
            },
            vec![],
        )
        .unwrap()
    }

    fn decode_result(message: Message) -> (Option<serde_json::Value>, Option<String>) {
        match message.decode().unwrap().0 {
            Envelope::Result { payload, error_text, .. } => (payload, error_text),
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_success() {
        let handler = counter_handler();
        let mut total = 40;
        let reply = handler.handle(&mut total, invoke("add", vec![json!(2)])).unwrap();
        assert_eq!(decode_result(reply), (Some(json!(42)), None));
    }

    #[test]
    fn test_inherited_names_are_unknown() {
        let handler = counter_handler();
        for name in ["constructor", "__proto__", "toString", "hasOwnProperty", ""] {
            let reply = handler.handle(&mut 0, invoke(name, vec![])).unwrap();
            let (payload, error) = decode_result(reply);
            assert!(payload.is_none());
            assert!(error.unwrap().starts_with("unknown method"));
        }
    }

    #[test]
    fn test_bad_arguments_and_panics_still_reply() {
        let handler = counter_handler();
        let (_, error) = decode_result(handler.handle(&mut 0, invoke("add", vec![json!("x")])).unwrap());
        assert!(error.unwrap().contains("parameter 0"));

        let (_, error) = decode_result(handler.handle(&mut 0, invoke("explode", vec![])).unwrap());
        assert_eq!(error.unwrap(), "explode panicked");
    }

    #[test]
    fn test_malformed_envelope_replies_when_id_known() {
        let handler = counter_handler();
        let message = Message {
            body: json!({"kind": "invoke", "correlationId": "id-9"}),
            buffers: vec![],
        };
        let reply = handler.handle(&mut 0, message).unwrap();
        assert_eq!(reply.correlation_id(), Some("id-9"));
        assert!(decode_result(reply).1.unwrap().starts_with("malformed envelope"));

        let anonymous = Message {
            body: json!(["not", "an", "envelope"]),
            buffers: vec![],
        };
        assert!(handler.handle(&mut 0, anonymous).is_none());
    }
}
