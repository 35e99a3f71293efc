//! Domain events emitted by a hub: connectivity changes plus decoded
//! doorbell activity. Fan-out happens over a broadcast channel; see
//! `Hub::events`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::DpId;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEventKind {
    /// Session established.
    Connected { host: String },
    /// Session lost; a reconnect is scheduled.
    Disconnected { reason: Option<String> },
    /// Doorbell button pressed.
    ButtonPressed {
        dp: DpId,
        payload: Value,
        image_url: Option<String>,
        decoded_by: String,
    },
    /// Motion detected.
    MotionDetected {
        dp: DpId,
        payload: Value,
        image_url: Option<String>,
        decoded_by: String,
    },
}

/// A timestamped event from one doorbell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Device id of the emitting doorbell.
    pub device_id: String,
    /// Emission time, ISO-8601 in the serialized form.
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: DomainEventKind,
}

impl DomainEvent {
    pub fn now(device_id: impl Into<String>, kind: DomainEventKind) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}
