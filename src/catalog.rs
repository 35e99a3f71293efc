//! Static datapoint catalog, keyed by doorbell firmware version.
//!
//! Each firmware generation exposes a different set of numbered datapoints
//! (DPs). The catalog records, per DP, its semantic type, whether it is
//! writable, display metadata and the enum/range details the entity adapters
//! need. Pure data, loaded once per firmware version.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Numeric datapoint identifier as used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DpId(pub u32);

impl fmt::Display for DpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DpId {
    fn from(id: u32) -> Self {
        DpId(id)
    }
}

impl DpId {
    /// Parse a wire-format key ("101") into a DP id.
    pub fn parse(s: &str) -> Option<DpId> {
        s.trim().parse::<u32>().ok().map(DpId)
    }
}

/// Semantic type of a datapoint value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpType {
    Boolean,
    Integer,
    String,
    Enum,
    Raw,
}

/// Whether a datapoint is read-only or also accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpCategory {
    StatusOnly,
    StatusFunction,
}

/// Numeric range metadata for integer datapoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpRange {
    pub min: i64,
    pub max: i64,
    pub step: i64,
}

/// Definition for a single datapoint.
#[derive(Debug, Clone)]
pub struct DpDefinition {
    pub id: DpId,
    pub code: &'static str,
    pub name: &'static str,
    pub dp_type: DpType,
    pub category: DpCategory,
    pub icon: &'static str,
    pub unit: Option<&'static str>,
    /// Raw enum key ("0") to display option ("Low"), for enum DPs.
    pub options: Option<&'static [(&'static str, &'static str)]>,
    pub range: Option<DpRange>,
    /// Self-reverting device control: commands are not verified by polling
    /// and the adapter tracks a virtual on-state instead.
    pub momentary: bool,
}

impl DpDefinition {
    const fn new(
        id: u32,
        code: &'static str,
        name: &'static str,
        dp_type: DpType,
        category: DpCategory,
        icon: &'static str,
    ) -> Self {
        Self {
            id: DpId(id),
            code,
            name,
            dp_type,
            category,
            icon,
            unit: None,
            options: None,
            range: None,
            momentary: false,
        }
    }

    const fn with_options(mut self, options: &'static [(&'static str, &'static str)]) -> Self {
        self.options = Some(options);
        self
    }

    const fn with_range(mut self, min: i64, max: i64, step: i64) -> Self {
        self.range = Some(DpRange { min, max, step });
        self
    }

    const fn momentary(mut self) -> Self {
        self.momentary = true;
        self
    }

    /// Look up the display option for a raw enum key.
    pub fn option_for(&self, key: &str) -> Option<&'static str> {
        self.options?
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    /// Look up the raw enum key for a display option.
    pub fn key_for_option(&self, option: &str) -> Option<&'static str> {
        self.options?
            .iter()
            .find(|(_, v)| *v == option)
            .map(|(k, _)| *k)
    }
}

/// Firmware generation of the physical doorbell, selecting which DP catalog
/// applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FirmwareVersion {
    #[default]
    #[serde(rename = "Version 4")]
    V4,
    #[serde(rename = "Version 5")]
    V5,
    #[serde(rename = "Version 6")]
    V6,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareVersion::V4 => write!(f, "Version 4"),
            FirmwareVersion::V5 => write!(f, "Version 5"),
            FirmwareVersion::V6 => write!(f, "Version 6"),
        }
    }
}

const SENSITIVITY_OPTIONS: &[(&str, &str)] = &[("0", "Low"), ("1", "Medium"), ("2", "High")];
const NIGHTVISION_OPTIONS: &[(&str, &str)] = &[("0", "Auto"), ("1", "Off"), ("2", "On")];

const V4_DEFINITIONS: &[DpDefinition] = &[
    DpDefinition::new(
        101,
        "basic_indicator",
        "Indicator",
        DpType::Boolean,
        DpCategory::StatusFunction,
        "mdi:led-on",
    ),
    DpDefinition::new(
        103,
        "basic_flip",
        "Vision Flip",
        DpType::Boolean,
        DpCategory::StatusFunction,
        "mdi:flip-horizontal",
    ),
    DpDefinition::new(
        104,
        "basic_osd",
        "OSD Watermark",
        DpType::Boolean,
        DpCategory::StatusFunction,
        "mdi:watermark",
    ),
    DpDefinition::new(
        106,
        "motion_sensitivity",
        "Motion Sensitivity",
        DpType::Enum,
        DpCategory::StatusFunction,
        "mdi:motion-sensor",
    )
    .with_options(SENSITIVITY_OPTIONS),
    DpDefinition::new(
        108,
        "basic_nightvision",
        "Night Vision",
        DpType::Enum,
        DpCategory::StatusFunction,
        "mdi:weather-night",
    )
    .with_options(NIGHTVISION_OPTIONS),
    DpDefinition::new(
        109,
        "sd_storge",
        "SD Card Capacity",
        DpType::String,
        DpCategory::StatusOnly,
        "mdi:micro-sd",
    ),
    DpDefinition::new(
        110,
        "sd_status",
        "SD Card Status",
        DpType::Integer,
        DpCategory::StatusOnly,
        "mdi:micro-sd",
    ),
    // StatusOnly on purpose: exposing format as a writable switch would let
    // a stray toggle wipe the card.
    DpDefinition::new(
        111,
        "sd_format",
        "Format SD Card",
        DpType::Boolean,
        DpCategory::StatusOnly,
        "mdi:format-color-fill",
    ),
    DpDefinition::new(
        115,
        "movement_detect_pic",
        "Motion Detected",
        DpType::Raw,
        DpCategory::StatusOnly,
        "mdi:motion-sensor",
    ),
    DpDefinition::new(
        117,
        "sd_format_state",
        "SD Format State",
        DpType::Integer,
        DpCategory::StatusOnly,
        "mdi:format-color-fill",
    ),
    DpDefinition::new(
        134,
        "motion_switch",
        "Motion Alert",
        DpType::Boolean,
        DpCategory::StatusFunction,
        "mdi:motion-sensor",
    ),
    DpDefinition::new(
        136,
        "doorbell_active",
        "Doorbell Active",
        DpType::String,
        DpCategory::StatusOnly,
        "mdi:doorbell",
    ),
    DpDefinition::new(
        150,
        "record_switch",
        "Record Switch",
        DpType::Boolean,
        DpCategory::StatusFunction,
        "mdi:record-rec",
    ),
    DpDefinition::new(
        151,
        "record_mode",
        "Recording Mode",
        DpType::Enum,
        DpCategory::StatusFunction,
        "mdi:record-rec",
    )
    .with_options(&[("0", "Event Recording"), ("1", "Continuous Recording")]),
    DpDefinition::new(
        156,
        "chime_ring_tune",
        "Chime Tune",
        DpType::Enum,
        DpCategory::StatusFunction,
        "mdi:bell-ring",
    )
    .with_options(&[
        ("0", "Tune 1"),
        ("1", "Tune 2"),
        ("2", "Tune 3"),
        ("3", "Tune 4"),
    ]),
    DpDefinition::new(
        157,
        "chime_ring_volume",
        "Chime Volume",
        DpType::Integer,
        DpCategory::StatusFunction,
        "mdi:volume-high",
    )
    .with_range(1, 10, 1),
    DpDefinition::new(
        160,
        "basic_device_volume",
        "Device Volume",
        DpType::Integer,
        DpCategory::StatusFunction,
        "mdi:volume-high",
    )
    .with_range(1, 10, 1),
    DpDefinition::new(
        165,
        "chime_settings",
        "Bell Selection",
        DpType::Enum,
        DpCategory::StatusFunction,
        "mdi:bell-ring",
    )
    .with_options(&[("0", "Option 1"), ("1", "Option 2"), ("2", "Option 3")]),
    DpDefinition::new(
        168,
        "motion_area_switch",
        "Motion Area Switch",
        DpType::Boolean,
        DpCategory::StatusFunction,
        "mdi:motion-sensor",
    ),
    DpDefinition::new(
        169,
        "motion_area",
        "Motion Area",
        DpType::String,
        DpCategory::StatusFunction,
        "mdi:motion-sensor",
    ),
    DpDefinition::new(
        185,
        "alarm_message",
        "Alarm Report",
        DpType::Raw,
        DpCategory::StatusOnly,
        "mdi:alarm-light",
    ),
    DpDefinition::new(
        244,
        "EVENT_LINKAGE_TYPE_E",
        "Event Linkage",
        DpType::Enum,
        DpCategory::StatusFunction,
        "mdi:link",
    ),
    DpDefinition::new(
        253,
        "onvif_change_pwd",
        "ONVIF Password",
        DpType::String,
        DpCategory::StatusFunction,
        "mdi:form-textbox-password",
    ),
    DpDefinition::new(
        254,
        "onvif_ip_addr",
        "ONVIF IP",
        DpType::String,
        DpCategory::StatusFunction,
        "mdi:ip-network",
    ),
    DpDefinition::new(
        255,
        "onvif_switch",
        "ONVIF Switch",
        DpType::Boolean,
        DpCategory::StatusFunction,
        "mdi:toggle-switch",
    ),
];

// Firmware 5 carries everything from firmware 4 plus these.
const V5_EXTRA_DEFINITIONS: &[DpDefinition] = &[
    DpDefinition::new(
        154,
        "someone_ring_doorbell",
        "Someone Ring Doorbell",
        DpType::Boolean,
        DpCategory::StatusOnly,
        "mdi:doorbell-video",
    ),
    // Pairing is a pulse: the device enters pairing mode and drops the flag
    // on its own, so the switch is momentary.
    DpDefinition::new(
        155,
        "bell_pairing",
        "Bell Pairing",
        DpType::Boolean,
        DpCategory::StatusFunction,
        "mdi:bell-plus",
    )
    .momentary(),
];

// Firmware 6 (battery models) is its own table.
const V6_DEFINITIONS: &[DpDefinition] = &[
    DpDefinition::new(
        104,
        "basic_osd",
        "OSD Watermark",
        DpType::Boolean,
        DpCategory::StatusFunction,
        "mdi:watermark",
    ),
    DpDefinition::new(
        108,
        "basic_nightvision",
        "Night Vision",
        DpType::Enum,
        DpCategory::StatusFunction,
        "mdi:weather-night",
    )
    .with_options(NIGHTVISION_OPTIONS),
    DpDefinition::new(
        109,
        "sd_storge",
        "SD Card Capacity",
        DpType::String,
        DpCategory::StatusOnly,
        "mdi:micro-sd",
    ),
    DpDefinition::new(
        110,
        "sd_status",
        "SD Card Status",
        DpType::Integer,
        DpCategory::StatusOnly,
        "mdi:micro-sd",
    ),
    DpDefinition::new(
        111,
        "sd_format",
        "Format SD Card",
        DpType::Boolean,
        DpCategory::StatusOnly,
        "mdi:format-color-fill",
    ),
    DpDefinition::new(
        115,
        "movement_detect_pic",
        "Motion Detected",
        DpType::Raw,
        DpCategory::StatusOnly,
        "mdi:motion-sensor",
    ),
    DpDefinition::new(
        117,
        "sd_format_state",
        "SD Format State",
        DpType::Integer,
        DpCategory::StatusOnly,
        "mdi:format-color-fill",
    ),
    DpDefinition::new(
        136,
        "doorbell_active",
        "Doorbell Active",
        DpType::String,
        DpCategory::StatusOnly,
        "mdi:doorbell",
    ),
    DpDefinition::new(
        145,
        "wireless_electricity",
        "Battery Level",
        DpType::Integer,
        DpCategory::StatusOnly,
        "mdi:battery",
    ),
    DpDefinition::new(
        146,
        "wireless_powermode",
        "Power Mode",
        DpType::Enum,
        DpCategory::StatusFunction,
        "mdi:power-settings",
    )
    .with_options(&[("0", "Normal"), ("1", "Power Saving"), ("2", "Performance")]),
    DpDefinition::new(
        147,
        "wireless_lowpower",
        "Low Power Threshold",
        DpType::Integer,
        DpCategory::StatusFunction,
        "mdi:battery-alert-variant",
    ),
    DpDefinition::new(
        149,
        "wireless_awake",
        "Device Awake",
        DpType::Boolean,
        DpCategory::StatusOnly,
        "mdi:power",
    ),
    DpDefinition::new(
        152,
        "pir_switch",
        "PIR Sensitivity",
        DpType::Enum,
        DpCategory::StatusFunction,
        "mdi:motion-sensor",
    )
    .with_options(SENSITIVITY_OPTIONS),
    DpDefinition::new(
        154,
        "doorbell_pic",
        "Doorbell Snapshot",
        DpType::Raw,
        DpCategory::StatusOnly,
        "mdi:camera",
    ),
    DpDefinition::new(
        159,
        "siren_switch",
        "Siren Switch",
        DpType::Boolean,
        DpCategory::StatusFunction,
        "mdi:bullhorn",
    )
    .momentary(),
    DpDefinition::new(
        160,
        "basic_device_volume",
        "Device Volume",
        DpType::Integer,
        DpCategory::StatusFunction,
        "mdi:volume-high",
    )
    .with_range(1, 10, 1),
    DpDefinition::new(
        170,
        "humanoid_filter",
        "Human Detection",
        DpType::Boolean,
        DpCategory::StatusFunction,
        "mdi:account",
    ),
    DpDefinition::new(
        185,
        "alarm_message",
        "Alarm Report",
        DpType::Raw,
        DpCategory::StatusOnly,
        "mdi:alarm-light",
    ),
    DpDefinition::new(
        188,
        "basic_anti_flicker",
        "Anti-Flicker Mode",
        DpType::Enum,
        DpCategory::StatusFunction,
        "mdi:flash",
    )
    .with_options(&[("0", "Auto"), ("1", "50Hz"), ("2", "60Hz")]),
    DpDefinition::new(
        212,
        "initiative_message",
        "Initiative Message",
        DpType::Raw,
        DpCategory::StatusOnly,
        "mdi:message",
    ),
    DpDefinition::new(
        231,
        "hide_voice_change",
        "Hide Voice Change",
        DpType::Boolean,
        DpCategory::StatusFunction,
        "mdi:voice",
    ),
];

fn build_map(definitions: &[&'static [DpDefinition]]) -> HashMap<DpId, &'static DpDefinition> {
    let mut map = HashMap::new();
    for table in definitions {
        for def in table.iter() {
            map.insert(def.id, def);
        }
    }
    map
}

/// Returns the datapoint catalog for the given firmware version.
pub fn dp_definitions(firmware: FirmwareVersion) -> &'static HashMap<DpId, &'static DpDefinition> {
    static V4: OnceLock<HashMap<DpId, &'static DpDefinition>> = OnceLock::new();
    static V5: OnceLock<HashMap<DpId, &'static DpDefinition>> = OnceLock::new();
    static V6: OnceLock<HashMap<DpId, &'static DpDefinition>> = OnceLock::new();

    match firmware {
        FirmwareVersion::V4 => V4.get_or_init(|| build_map(&[V4_DEFINITIONS])),
        FirmwareVersion::V5 => {
            V5.get_or_init(|| build_map(&[V4_DEFINITIONS, V5_EXTRA_DEFINITIONS]))
        }
        FirmwareVersion::V6 => V6.get_or_init(|| build_map(&[V6_DEFINITIONS])),
    }
}

/// Look up a single datapoint definition.
pub fn dp_definition(firmware: FirmwareVersion, dp: DpId) -> Option<&'static DpDefinition> {
    dp_definitions(firmware).get(&dp).copied()
}
