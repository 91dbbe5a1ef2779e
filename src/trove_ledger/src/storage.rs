//! Event log persistence: CBOR-encoded via `ciborium`.
//!
//! The host decides where the bytes live; the ledger only guarantees that
//! `replay(decode_events(encode_events(log)))` reproduces the state.

use crate::event::Event;

pub fn encode_events(events: &[Event]) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(events, &mut buf).expect("failed to CBOR-encode the event log");
    buf
}

pub fn decode_events(bytes: &[u8]) -> Result<Vec<Event>, String> {
    ciborium::de::from_reader(bytes).map_err(|e| format!("failed to decode the event log: {e}"))
}
