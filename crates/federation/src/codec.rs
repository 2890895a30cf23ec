//! Activity (de)serialization boundary.

use apub_common::{AppError, AppResult};
use bytes::Bytes;
use serde_json::Value;

use crate::vocab::{Activity, ApObject, CONTEXT};

/// Converts raw payloads to typed activities and back.
pub trait ActivityCodec: Send + Sync {
    /// Parse a raw request body.
    fn deserialize(&self, raw: &[u8]) -> AppResult<Activity>;

    /// Serialize an activity verbatim.
    fn serialize(&self, activity: &Activity) -> AppResult<Bytes>;

    /// Serialize the copy that leaves the server: `bto`/`bcc` are removed
    /// from the activity and from every embedded object.
    fn serialize_for_delivery(&self, activity: &Activity) -> AppResult<Bytes> {
        let mut object: ApObject = activity.as_object().clone();
        object.strip_blind_addressing();
        let stripped = Activity::from_object(object)?;
        self.serialize(&stripped)
    }
}

/// JSON codec that adds the ActivityStreams context when it is missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ActivityCodec for JsonCodec {
    fn deserialize(&self, raw: &[u8]) -> AppResult<Activity> {
        let value: Value = serde_json::from_slice(raw)?;
        if !value.is_object() {
            return Err(AppError::MalformedActivity(
                "Payload is not a JSON object".to_string(),
            ));
        }
        let object: ApObject = serde_json::from_value(value)?;
        Activity::from_object(object)
    }

    fn serialize(&self, activity: &Activity) -> AppResult<Bytes> {
        let mut object = activity.as_object().clone();
        if object.context.is_none() {
            object.context = Some(Value::String(CONTEXT.to_string()));
        }
        let body = serde_json::to_vec(&object)
            .map_err(|e| AppError::Internal(format!("Failed to serialize activity: {e}")))?;
        Ok(Bytes::from(body))
    }
}
