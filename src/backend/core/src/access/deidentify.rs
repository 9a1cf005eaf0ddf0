//! De-identification of data returned to analyst reads.
//!
//! Strips direct-identifier fields from payloads recursively and scrubs
//! identifier-shaped values out of remaining free text. The stored records
//! are untouched; only the returned copies are filtered.

use serde_json::Value;

use crate::annotations::store::Annotation;
use crate::events::event::{EventRecord, Payload};
use crate::projection::state::AggregateState;
use crate::telemetry;

fn scrub(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !telemetry::is_identifier_field(key))
                .map(|(key, value)| (key.clone(), scrub(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(scrub).collect()),
        Value::String(text) => Value::String(telemetry::redact_free_text(text)),
        other => other.clone(),
    }
}

pub fn payload(payload: &Payload) -> Payload {
    Payload {
        schema: payload.schema.clone(),
        schema_version: payload.schema_version,
        data: scrub(&payload.data),
    }
}

pub fn event(event: &EventRecord) -> EventRecord {
    let mut copy = event.clone();
    copy.payload = payload(&event.payload);
    copy.reason = event.reason.as_deref().map(telemetry::redact_free_text);
    copy
}

pub fn state(state: &AggregateState) -> AggregateState {
    let mut copy = state.clone();
    copy.current_payload = payload(&state.current_payload);
    copy
}

pub fn annotation(annotation: &Annotation) -> Annotation {
    let mut copy = annotation.clone();
    copy.text = telemetry::redact_free_text(&annotation.text);
    copy
}
