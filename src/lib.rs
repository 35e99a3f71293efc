//! # tuya-doorbell
//!
//! Local-network hub for Tuya-protocol video doorbells: session lifecycle
//! with IP rediscovery and backoff reconnects, deduplicated datapoint
//! routing, best-effort event payload decoding and typed entity adapters.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tuya_doorbell::{DeviceConfig, Hub, HashStore};
//!
//! let config = DeviceConfig::new("DEVICE_ID", "LOCAL_KEY")
//!     .with_host("192.168.1.50")
//!     .with_subnet("192.168.1.0/24");
//! let hub = Hub::new(config, connector, HashStore::ephemeral());
//! hub.connect().await?;
//! ```
//!
pub mod catalog;
pub mod config;
pub mod decode;
pub mod entity;
pub mod error;
pub mod event;
pub mod hub;
pub mod protocol;
pub mod registry;
pub mod scanner;
pub mod store;
pub mod value;

pub use catalog::{DpDefinition, DpId, FirmwareVersion, dp_definition, dp_definitions};
pub use config::{DeviceConfig, DeviceIdentity, DpsMap};
pub use decode::{DecodeStrategy, decode, extract_image_url};
pub use entity::{
    DpSubscriber, NumberAdapter, SelectAdapter, SensorAdapter, SwitchAdapter,
};
pub use error::{DoorbellError, Result};
pub use event::{DomainEvent, DomainEventKind};
pub use hub::Hub;
pub use protocol::{Connector, DpsSnapshot, PushEvent, Session};
pub use registry::HubRegistry;
pub use store::HashStore;
pub use value::DeviceValue;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
