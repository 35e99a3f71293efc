//! Entity adapters: typed views over single datapoints.
//!
//! Each adapter subscribes to one DP via [`DpSubscriber`] and keeps a small
//! piece of display state the embedding platform can read. Device echoes
//! that arrive shortly after a user command are ignored so a slow device
//! cannot flip a switch back in the UI right after it was toggled.

use std::sync::{Arc, Weak};
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::catalog::{DpDefinition, DpId};
use crate::value::DeviceValue;

/// How long a momentary switch stays virtually on before auto-reverting.
pub const MOMENTARY_REVERT: Duration = Duration::from_secs(5);

/// Grace window after a user command during which contradicting device
/// echoes are dropped.
pub const MANUAL_OVERRIDE: Duration = Duration::from_secs(2);

/// Longer grace window for momentary switches, whose devices echo stale
/// state well after the pulse.
pub const MOMENTARY_OVERRIDE: Duration = Duration::from_secs(10);

/// Receives DP updates fanned out by the hub.
pub trait DpSubscriber: Send + Sync {
    /// The datapoint this subscriber follows.
    fn dp(&self) -> DpId;

    /// Called with every deduplicated update for that datapoint.
    fn on_update(&self, value: &DeviceValue);
}

// ---------------------------------------------------------------------------
// Switch
// ---------------------------------------------------------------------------

struct SwitchState {
    is_on: bool,
    override_until: Option<Instant>,
    /// Bumped on every command; a pending auto-revert only fires if the
    /// generation it captured is still current.
    generation: u64,
}

/// Boolean DP as an on/off switch. Momentary definitions get a virtual
/// on-state with a cancelable auto-revert instead of trusting the device.
pub struct SwitchAdapter {
    definition: &'static DpDefinition,
    state: Mutex<SwitchState>,
    weak: Weak<SwitchAdapter>,
}

impl SwitchAdapter {
    pub fn new(definition: &'static DpDefinition) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            definition,
            state: Mutex::new(SwitchState {
                is_on: false,
                override_until: None,
                generation: 0,
            }),
            weak: weak.clone(),
        })
    }

    pub fn definition(&self) -> &'static DpDefinition {
        self.definition
    }

    pub fn is_on(&self) -> bool {
        self.state.lock().is_on
    }

    /// The value to send to the device for an on/off command, or `None`
    /// when nothing should be sent (momentary turn-off is virtual only).
    pub fn device_command(&self, on: bool) -> Option<DeviceValue> {
        if self.definition.momentary && !on {
            None
        } else {
            Some(DeviceValue::Bool(on))
        }
    }

    /// Record that a command was issued. Applies the optimistic state,
    /// opens the override window and, for a momentary turn-on, schedules
    /// the auto-revert.
    pub fn note_command(&self, on: bool) {
        let window = if self.definition.momentary {
            MOMENTARY_OVERRIDE
        } else {
            MANUAL_OVERRIDE
        };
        let generation = {
            let mut state = self.state.lock();
            state.is_on = on;
            state.override_until = Some(Instant::now() + window);
            state.generation += 1;
            state.generation
        };

        if self.definition.momentary && on {
            self.schedule_revert(generation, Instant::now() + MOMENTARY_REVERT);
        }
    }

    /// The deadline is pinned to the command (or pulse) time, not to when
    /// the revert task first gets polled.
    fn schedule_revert(&self, generation: u64, deadline: Instant) {
        let Some(adapter) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut state = adapter.state.lock();
            if state.generation == generation && state.is_on {
                debug!(
                    "Auto-reverting momentary switch dp {}",
                    adapter.definition.id
                );
                state.is_on = false;
            }
        });
    }
}

impl DpSubscriber for SwitchAdapter {
    fn dp(&self) -> DpId {
        self.definition.id
    }

    fn on_update(&self, value: &DeviceValue) {
        let reported = value.is_truthy();
        let mut state = self.state.lock();
        if let Some(until) = state.override_until {
            if Instant::now() < until && reported != state.is_on {
                debug!(
                    "Ignoring contradicting echo for dp {} during override window",
                    self.definition.id
                );
                return;
            }
            state.override_until = None;
        }
        if self.definition.momentary {
            // A device-initiated pulse shows as on and reverts on its own;
            // falsy reports never override the virtual state.
            if reported && !state.is_on {
                state.is_on = true;
                state.generation += 1;
                let generation = state.generation;
                drop(state);
                self.schedule_revert(generation, Instant::now() + MOMENTARY_REVERT);
            }
        } else {
            state.is_on = reported;
        }
    }
}

// ---------------------------------------------------------------------------
// Select
// ---------------------------------------------------------------------------

/// Enum DP as a select with display options. The device speaks raw keys
/// ("0"); the adapter maps them to catalog options ("Low") and back.
pub struct SelectAdapter {
    definition: &'static DpDefinition,
    current: Mutex<Option<&'static str>>,
}

impl SelectAdapter {
    pub fn new(definition: &'static DpDefinition) -> Arc<Self> {
        Arc::new(Self {
            definition,
            current: Mutex::new(None),
        })
    }

    pub fn definition(&self) -> &'static DpDefinition {
        self.definition
    }

    pub fn options(&self) -> Vec<&'static str> {
        self.definition
            .options
            .map(|opts| opts.iter().map(|(_, v)| *v).collect())
            .unwrap_or_default()
    }

    /// Currently reported option, `None` for unknown raw values.
    pub fn current_option(&self) -> Option<&'static str> {
        *self.current.lock()
    }

    /// The raw value to send for a display option.
    pub fn device_command(&self, option: &str) -> Option<DeviceValue> {
        self.definition
            .key_for_option(option)
            .map(DeviceValue::from)
    }
}

impl DpSubscriber for SelectAdapter {
    fn dp(&self) -> DpId {
        self.definition.id
    }

    fn on_update(&self, value: &DeviceValue) {
        let key = value.to_string();
        *self.current.lock() = self.definition.option_for(&key);
    }
}

// ---------------------------------------------------------------------------
// Number
// ---------------------------------------------------------------------------

/// Integer DP with range metadata.
pub struct NumberAdapter {
    definition: &'static DpDefinition,
    current: Mutex<Option<i64>>,
}

impl NumberAdapter {
    pub fn new(definition: &'static DpDefinition) -> Arc<Self> {
        Arc::new(Self {
            definition,
            current: Mutex::new(None),
        })
    }

    pub fn definition(&self) -> &'static DpDefinition {
        self.definition
    }

    pub fn current(&self) -> Option<i64> {
        *self.current.lock()
    }

    /// Clamp a requested value into the catalog range and snap it to the
    /// step grid.
    pub fn device_command(&self, requested: i64) -> DeviceValue {
        let value = match self.definition.range {
            Some(range) => {
                let clamped = requested.clamp(range.min, range.max);
                let step = range.step.max(1);
                range.min + ((clamped - range.min) / step) * step
            }
            None => requested,
        };
        DeviceValue::Int(value)
    }
}

impl DpSubscriber for NumberAdapter {
    fn dp(&self) -> DpId {
        self.definition.id
    }

    fn on_update(&self, value: &DeviceValue) {
        let parsed = match value {
            DeviceValue::Int(i) => Some(*i),
            DeviceValue::Float(f) => Some(*f as i64),
            DeviceValue::Str(s) => s.trim().parse::<i64>().ok(),
            DeviceValue::Bool(b) => Some(*b as i64),
            _ => None,
        };
        if let Some(v) = parsed {
            *self.current.lock() = Some(v);
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor
// ---------------------------------------------------------------------------

/// Read-only DP rendered as a string state. The device's "unknown" marker
/// resets the state instead of being displayed.
pub struct SensorAdapter {
    definition: &'static DpDefinition,
    current: Mutex<Option<String>>,
}

impl SensorAdapter {
    pub fn new(definition: &'static DpDefinition) -> Arc<Self> {
        Arc::new(Self {
            definition,
            current: Mutex::new(None),
        })
    }

    pub fn definition(&self) -> &'static DpDefinition {
        self.definition
    }

    pub fn current(&self) -> Option<String> {
        self.current.lock().clone()
    }
}

impl DpSubscriber for SensorAdapter {
    fn dp(&self) -> DpId {
        self.definition.id
    }

    fn on_update(&self, value: &DeviceValue) {
        let rendered = value.to_string();
        let mut current = self.current.lock();
        if rendered.eq_ignore_ascii_case("unknown") {
            *current = None;
        } else {
            *current = Some(rendered);
        }
    }
}
