//! Device configuration model: identity, endpoint and event-DP mapping.

use serde::{Deserialize, Serialize};

use crate::catalog::{DpId, FirmwareVersion};

/// Default TCP port the doorbell listens on.
pub const DEFAULT_PORT: u16 = 6668;

/// Default datapoint carrying button-press reports.
pub const DEFAULT_BUTTON_DP: DpId = DpId(185);

/// Default datapoint carrying motion-detection reports.
pub const DEFAULT_MOTION_DP: DpId = DpId(115);

/// Immutable identity of one doorbell. Never changes over the life of a hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Tuya device id (`bf...`), also used as the event source id.
    pub device_id: String,
    /// Local encryption key for the protocol session.
    pub local_key: String,
    /// Protocol version string understood by the transport ("3.3", "3.4").
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Firmware generation, selects the DP catalog.
    #[serde(default)]
    pub firmware_version: FirmwareVersion,
}

fn default_protocol_version() -> String {
    "3.3".to_string()
}

/// Where the doorbell lives on the network. Mutable: rediscovery rewrites
/// `last_known_good` whenever the device is found at a new address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEndpoint {
    /// Statically configured host, if any.
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address the device last answered on.
    pub last_known_good: Option<String>,
    /// CIDR subnet to sweep when both host candidates fail ("192.168.1.0/24").
    pub subnet: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ConnectionEndpoint {
    /// Candidate hosts in resolution order: configured host first, then the
    /// last address that worked.
    pub fn candidates(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(host) = &self.host {
            out.push(host.clone());
        }
        if let Some(last) = &self.last_known_good
            && Some(last) != self.host.as_ref()
        {
            out.push(last.clone());
        }
        out
    }
}

/// Which datapoints carry the doorbell's event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpsMap {
    #[serde(default = "default_button_dp")]
    pub button: DpId,
    #[serde(default = "default_motion_dp")]
    pub motion: DpId,
}

fn default_button_dp() -> DpId {
    DEFAULT_BUTTON_DP
}

fn default_motion_dp() -> DpId {
    DEFAULT_MOTION_DP
}

impl Default for DpsMap {
    fn default() -> Self {
        Self {
            button: DEFAULT_BUTTON_DP,
            motion: DEFAULT_MOTION_DP,
        }
    }
}

/// Complete configuration for one hub instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub identity: DeviceIdentity,
    pub endpoint: ConnectionEndpoint,
    #[serde(default)]
    pub dps_map: DpsMap,
}

impl DeviceConfig {
    pub fn new(device_id: impl Into<String>, local_key: impl Into<String>) -> Self {
        Self {
            identity: DeviceIdentity {
                device_id: device_id.into(),
                local_key: local_key.into(),
                protocol_version: default_protocol_version(),
                firmware_version: FirmwareVersion::default(),
            },
            endpoint: ConnectionEndpoint {
                port: DEFAULT_PORT,
                ..Default::default()
            },
            dps_map: DpsMap::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.endpoint.host = Some(host.into());
        self
    }

    pub fn with_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.endpoint.subnet = Some(subnet.into());
        self
    }

    pub fn with_firmware(mut self, firmware: FirmwareVersion) -> Self {
        self.identity.firmware_version = firmware;
        self
    }
}
