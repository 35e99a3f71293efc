//! Protocol client surface.
//!
//! The wire protocol (framing, encryption, key negotiation) lives behind
//! these traits; the hub only ever talks to a [`Connector`] and the
//! [`Session`] it opens. Unsolicited device reports arrive on an mpsc
//! channel handed to the connector at connect time, so the hub consumes
//! them in arrival order from its own task.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::mpsc;

use crate::catalog::DpId;
use crate::config::DeviceIdentity;
use crate::error::Result;
use crate::value::DeviceValue;

/// A bulk status snapshot: DP id to current value.
pub type DpsSnapshot = HashMap<DpId, DeviceValue>;

/// Unsolicited traffic pushed by the device over an open session.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A status report, solicited or not. Carries one or more DP values.
    Status(DpsSnapshot),
    /// The transport noticed the connection die.
    Disconnected { reason: Option<String> },
}

/// An authenticated, open session with one doorbell.
///
/// The hub owns at most one live session at a time and drives every call
/// from its background task, hence `&mut self` throughout.
pub trait Session: Send + 'static {
    /// Request a full status snapshot.
    fn status(&mut self) -> impl Future<Output = Result<DpsSnapshot>> + Send;

    /// Request a single DP value. `None` when the device omits it.
    fn get_dp(&mut self, dp: DpId) -> impl Future<Output = Result<Option<DeviceValue>>> + Send;

    /// Write a single DP value.
    fn set_dp(
        &mut self,
        dp: DpId,
        value: &DeviceValue,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Write several DP values in one command.
    fn set_dps(&mut self, dps: &DpsSnapshot) -> impl Future<Output = Result<()>> + Send;

    /// Keep-alive ping. An error means the session is gone.
    fn heartbeat(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Close the session. Infallible: a session being torn down has nothing
    /// useful to report.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens sessions. One connector per transport implementation; cloned into
/// the hub's background task.
pub trait Connector: Clone + Send + Sync + 'static {
    type Session: Session;

    /// Connect and authenticate against `host:port`. Push traffic for the
    /// life of the session goes to `push_tx`; dropping the session closes
    /// the channel.
    fn connect(
        &self,
        host: &str,
        port: u16,
        identity: &DeviceIdentity,
        push_tx: mpsc::Sender<PushEvent>,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}
