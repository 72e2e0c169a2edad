//! Wire payload decoding.

use agripal_types::{DeviceSample, RECEIVED_AT_FIELD};

use crate::error::DecodeError;

/// A decoded sample together with the topic it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub topic: String,
    pub sample: DeviceSample,
}

/// Decodes one PUBLISH payload.
///
/// The payload must be a JSON object with non-empty string `farm_id` and
/// `device_id` fields; every other field is kept as a metric. A device-sent
/// `receivedAt` is discarded because the server assigns that field.
///
/// # Errors
///
/// Returns [`DecodeError`] for malformed or incomplete payloads.
pub fn decode_payload(payload: &[u8]) -> Result<DeviceSample, DecodeError> {
    let mut sample: DeviceSample = serde_json::from_slice(payload)?;

    if sample.farm_id.trim().is_empty() {
        return Err(DecodeError::EmptyIdentifier("farm_id"));
    }
    if sample.device_id.trim().is_empty() {
        return Err(DecodeError::EmptyIdentifier("device_id"));
    }

    sample.metrics.retain(|name, _| name != RECEIVED_AT_FIELD);
    Ok(sample)
}
