//! Envelopes, messages and the binary transfer convention.

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::types::{blob_from_json, blob_to_json, RecordId};

/// Key marking a parameter or payload that lives in the buffer list.
pub const TRANSFER_KEY: &str = "__transfer";

// =============================================================================
// Envelope
// =============================================================================

/// The two message shapes on an RPC channel.
///
/// ```json
/// { "kind": "invoke", "correlationId": "18f3a-1", "methodName": "ping", "parameters": [] }
/// { "kind": "result", "correlationId": "18f3a-1", "payload": true }
/// { "kind": "result", "correlationId": "18f3a-2", "errorText": "Query failed: ..." }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Envelope {
    Invoke {
        correlation_id: String,
        method_name: String,
        parameters: Vec<Value>,
    },
    Result {
        correlation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_text: Option<String>,
    },
}

impl Envelope {
    pub fn correlation_id(&self) -> &str {
        match self {
            Envelope::Invoke { correlation_id, .. } | Envelope::Result { correlation_id, .. } => {
                correlation_id
            }
        }
    }

    /// A successful result.
    pub fn success(correlation_id: impl Into<String>, payload: Value) -> Self {
        Envelope::Result {
            correlation_id: correlation_id.into(),
            payload: Some(payload),
            error_text: None,
        }
    }

    /// A failed result carrying only error text.
    pub fn failure(correlation_id: impl Into<String>, error_text: impl Into<String>) -> Self {
        Envelope::Result {
            correlation_id: correlation_id.into(),
            payload: None,
            error_text: Some(error_text.into()),
        }
    }
}

// =============================================================================
// Message
// =============================================================================

/// What actually travels on a channel: an envelope as JSON plus raw buffers.
///
/// Buffers are referenced from the JSON by `{"__transfer": <index>}`. They are
/// moved, not copied, on in-process channels, and written as raw bytes on
/// byte-stream channels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub body: Value,
    pub buffers: Vec<Vec<u8>>,
}

impl Message {
    pub fn new(envelope: &Envelope, buffers: Vec<Vec<u8>>) -> Result<Self> {
        Ok(Self {
            body: serde_json::to_value(envelope)?,
            buffers,
        })
    }

    /// Reads the correlation id without validating anything else.
    pub fn correlation_id(&self) -> Option<&str> {
        self.body.get("correlationId")?.as_str()
    }

    /// Validates the envelope shape.
    pub fn decode(self) -> Result<(Envelope, Vec<Vec<u8>>)> {
        if !self.body.is_object() {
            return Err(Error::MalformedEnvelope("envelope is not an object".to_string()));
        }
        let envelope = Envelope::deserialize(&self.body)
            .map_err(|e| Error::MalformedEnvelope(e.to_string()))?;
        Ok((envelope, self.buffers))
    }

    /// Replaces every transfer reference with an inline base64 copy.
    ///
    /// Used when a channel cannot carry buffers next to the JSON.
    pub fn inline_transfers(mut self) -> Self {
        if !self.buffers.is_empty() {
            let mut buffers = std::mem::take(&mut self.buffers);
            inline_value(&mut self.body, &mut buffers);
        }
        self
    }
}

fn transfer_index(value: &Value) -> Option<usize> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    usize::try_from(obj.get(TRANSFER_KEY)?.as_u64()?).ok()
}

fn inline_value(value: &mut Value, buffers: &mut [Vec<u8>]) {
    if let Some(index) = transfer_index(value) {
        if let Some(bytes) = buffers.get_mut(index) {
            *value = blob_to_json(&std::mem::take(bytes));
        }
        return;
    }
    match value {
        Value::Array(items) => items.iter_mut().for_each(|v| inline_value(v, buffers)),
        Value::Object(map) => map.values_mut().for_each(|v| inline_value(v, buffers)),
        _ => {}
    }
}

/// Resolves a binary value in either transfer or inline form.
fn take_bytes(value: &Value, buffers: &mut [Vec<u8>]) -> Result<Vec<u8>> {
    if let Some(index) = transfer_index(value) {
        return buffers
            .get_mut(index)
            .map(std::mem::take)
            .ok_or_else(|| Error::MalformedEnvelope(format!("missing transfer buffer {index}")));
    }
    if let Some(bytes) = blob_from_json(value) {
        return Ok(bytes);
    }
    // plain base64 text is accepted too
    if let Some(text) = value.as_str() {
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(text) {
            return Ok(bytes);
        }
    }
    Err(Error::MalformedEnvelope("expected a binary value".to_string()))
}

// =============================================================================
// Outbound Arguments
// =============================================================================

/// Wrapper asking the proxy to move bytes instead of encoding them.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer(pub Vec<u8>);

/// One outbound call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    Transfer(Transfer),
}

impl Arg {
    /// Serializes any value into an argument.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Arg::Value(serde_json::to_value(value)?))
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<Transfer> for Arg {
    fn from(transfer: Transfer) -> Self {
        Arg::Transfer(transfer)
    }
}

/// Splits arguments into JSON parameters and a buffer list.
pub(crate) fn pack_args(args: Vec<Arg>) -> (Vec<Value>, Vec<Vec<u8>>) {
    let mut buffers = Vec::new();
    let parameters = args
        .into_iter()
        .map(|arg| match arg {
            Arg::Value(value) => value,
            Arg::Transfer(Transfer(bytes)) => {
                buffers.push(bytes);
                json!({ TRANSFER_KEY: buffers.len() - 1 })
            }
        })
        .collect();
    (parameters, buffers)
}

// =============================================================================
// Inbound Arguments
// =============================================================================

/// Parameters of an incoming invoke, with typed accessors.
///
/// Every accessor reports a shape mismatch as [`Error::Validation`], so a bad
/// argument is rejected before the engine sees it.
#[derive(Debug, Default)]
pub struct Args {
    params: Vec<Value>,
    buffers: Vec<Vec<u8>>,
}

impl Args {
    pub fn new(params: Vec<Value>, buffers: Vec<Vec<u8>>) -> Self {
        Self { params, buffers }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn raw(&self, index: usize) -> Result<&Value> {
        self.params
            .get(index)
            .ok_or_else(|| Error::Validation(format!("missing parameter {index}")))
    }

    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        T::deserialize(self.raw(index)?)
            .map_err(|e| Error::Validation(format!("parameter {index}: {e}")))
    }

    /// Missing and `null` both read as `None`.
    pub fn optional<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>> {
        match self.params.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.get(index).map(Some),
        }
    }

    pub fn text(&self, index: usize) -> Result<String> {
        self.get(index)
    }

    pub fn row_id(&self, index: usize) -> Result<RecordId> {
        RecordId::from_json(self.raw(index)?)
    }

    /// Validates every id before returning any of them.
    pub fn row_ids(&self, index: usize) -> Result<Vec<RecordId>> {
        let Value::Array(items) = self.raw(index)? else {
            return Err(Error::Validation(format!("parameter {index}: expected an array of row ids")));
        };
        items.iter().map(RecordId::from_json).collect()
    }

    pub fn take_bytes(&mut self, index: usize) -> Result<Vec<u8>> {
        let value = self.raw(index)?.clone();
        take_bytes(&value, &mut self.buffers)
    }
}

// =============================================================================
// Results
// =============================================================================

/// A successful result: the payload JSON plus any buffers it references.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    pub value: Value,
    pub buffers: Vec<Vec<u8>>,
}

impl Payload {
    /// An empty (`null`) result.
    pub fn unit() -> Self {
        Self::default()
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self {
            value: serde_json::to_value(value)?,
            buffers: Vec::new(),
        })
    }

    /// A binary result moved through the buffer list.
    pub fn transfer(bytes: Vec<u8>) -> Self {
        Self {
            value: json!({ TRANSFER_KEY: 0 }),
            buffers: vec![bytes],
        }
    }

    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.value)?)
    }

    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        take_bytes(&self.value, &mut self.buffers)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let invoke = Envelope::Invoke {
            correlation_id: "a-1".into(),
            method_name: "ping".into(),
            parameters: vec![],
        };
        assert_eq!(
            serde_json::to_value(&invoke).unwrap(),
            json!({"kind": "invoke", "correlationId": "a-1", "methodName": "ping", "parameters": []})
        );
        assert_eq!(
            serde_json::to_value(Envelope::failure("a-2", "boom")).unwrap(),
            json!({"kind": "result", "correlationId": "a-2", "errorText": "boom"})
        );
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        for body in [json!("invoke"), json!({"kind": "launch", "correlationId": "x"}), json!({"kind": "invoke"})] {
            let message = Message { body, buffers: vec![] };
            assert!(matches!(message.decode(), Err(Error::MalformedEnvelope(_))));
        }
    }

    #[test]
    fn test_transfer_args_and_inline_fallback() {
        let (params, buffers) = pack_args(vec![Arg::from(json!("t")), Transfer(vec![1, 2, 3]).into()]);
        assert_eq!(params[1], json!({"__transfer": 0}));
        assert_eq!(buffers, vec![vec![1, 2, 3]]);

        let message = Message::new(
            &Envelope::Invoke {
                correlation_id: "c".into(),
                method_name: "loadDatabase".into(),
                parameters: params,
            },
            buffers,
        )
        .unwrap()
        .inline_transfers();
        assert!(message.buffers.is_empty());
        assert_eq!(message.body["parameters"][1], json!({"__type": "Uint8Array", "data": "AQID"}));

        let (envelope, buffers) = message.decode().unwrap();
        let Envelope::Invoke { parameters, .. } = envelope else { panic!("expected invoke") };
        let mut args = Args::new(parameters, buffers);
        assert_eq!(args.take_bytes(1).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_args_validation() {
        let args = Args::new(vec![json!("users"), json!([1, "2", "x"]), json!(null)], vec![]);
        assert_eq!(args.text(0).unwrap(), "users");
        assert!(matches!(args.row_ids(1), Err(Error::InvalidRowId(_))));
        assert_eq!(args.optional::<String>(2).unwrap(), None);
        assert_eq!(args.optional::<String>(7).unwrap(), None);
        assert!(matches!(args.get::<i64>(0), Err(Error::Validation(_))));
        assert!(matches!(args.raw(9), Err(Error::Validation(_))));
    }

    #[test]
    fn test_payload_bytes_both_forms() {
        assert_eq!(Payload::transfer(vec![9, 8]).into_bytes().unwrap(), vec![9, 8]);
        let inline = Payload {
            value: blob_to_json(&[7]),
            buffers: vec![],
        };
        assert_eq!(inline.into_bytes().unwrap(), vec![7]);
        assert!(Payload::unit().into_bytes().is_err());
    }
}
