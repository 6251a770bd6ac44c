//! The three built-in devices and the status indicator.
//!
//! Requests may name a device by its short alias (`touch`, `board`,
//! `matrix`); everything below the request layer uses the internal name.

use crate::color::Rgb;
use crate::device::{DeviceConfig, Registry};
use crate::error::Result;
use crate::geometry::{Origin, Scan};
use crate::layer::LayerConfig;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::debug;

pub const TOUCH: &str = "led_touch";
pub const BOARD: &str = "led_board";
pub const MATRIX: &str = "led_matrix";

/// Short names in boot-restore order.
pub const SHORT_NAMES: [&str; 3] = ["touch", "board", "matrix"];

/// Short alias → internal name; anything else passes through.
pub fn resolve_alias(name: &str) -> &str {
    match name {
        "touch" => TOUCH,
        "board" => BOARD,
        "matrix" => MATRIX,
        other => other,
    }
}

/// Internal or short name → short name, for the three presets only.
pub fn short_name(name: &str) -> Option<&'static str> {
    match resolve_alias(name) {
        TOUCH => Some("touch"),
        BOARD => Some("board"),
        MATRIX => Some("matrix"),
        _ => None,
    }
}

pub fn touch_config() -> DeviceConfig {
    DeviceConfig::strip(TOUCH, 16, 80)
}

pub fn board_config() -> DeviceConfig {
    DeviceConfig::ring(BOARD, 32, 60)
}

pub fn matrix_config(width: u16, height: u16) -> DeviceConfig {
    DeviceConfig::matrix(MATRIX, width, height, Scan::ZigzagRows, Origin::TopLeft, 50)
}

pub fn default_devices() -> Vec<DeviceConfig> {
    vec![touch_config(), board_config(), matrix_config(32, 32)]
}

// ── Status indicator ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Busy,
    Success,
    Error,
    Warning,
    Network,
    Usb,
    Boot,
}

impl Status {
    pub fn color(self) -> Rgb {
        match self {
            Self::Idle => Rgb::new(0, 0, 64),
            Self::Busy => Rgb::new(64, 64, 0),
            Self::Success => Rgb::new(0, 64, 0),
            Self::Error => Rgb::new(64, 0, 0),
            Self::Warning => Rgb::new(64, 32, 0),
            Self::Network => Rgb::new(0, 32, 64),
            Self::Usb => Rgb::new(32, 0, 64),
            Self::Boot => Rgb::new(64, 64, 64),
        }
    }
}

/// Owns a dedicated layer on the touch device.
#[derive(Default)]
pub struct StatusIndicator {
    layer: Mutex<Option<usize>>,
}

impl StatusIndicator {
    pub fn set(&self, registry: &Registry, status: Status) -> Result<()> {
        let device = registry.get(TOUCH)?;
        let mut slot = self.layer.lock().unwrap_or_else(|e| e.into_inner());
        device.with_state(|state| {
            let index = match *slot {
                Some(i) => i,
                None => {
                    let i = state.layer_create(LayerConfig::default())?;
                    *slot = Some(i);
                    i
                }
            };
            state.layer(index)?.fill(status.color());
            Ok(())
        })?;
        debug!("Status indicator: {:?}", status);
        Ok(())
    }

    pub fn clear(&self, registry: &Registry) -> Result<()> {
        self.set(registry, Status::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::compose;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("touch", "led_touch")]
    #[case("board", "led_board")]
    #[case("matrix", "led_matrix")]
    #[case("led_matrix", "led_matrix")]
    #[case("custom", "custom")]
    fn aliases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(resolve_alias(input), expected);
    }

    #[test]
    fn preset_shapes() {
        let m = matrix_config(32, 32);
        let g = m.geometry();
        assert_eq!(g.led_count(), 1024);
        assert_eq!(g.xy_to_index(0, 1).unwrap(), 63);
        assert_eq!(g.xy_to_index(0, 2).unwrap(), 64);
        assert_eq!(touch_config().brightness, 80);
        assert_eq!(board_config().geometry().led_count(), 32);
    }

    #[test]
    fn status_layer_covers_touch() {
        let reg = Registry::new();
        reg.create(touch_config()).unwrap();
        let status = StatusIndicator::default();
        status.set(&reg, Status::Error).unwrap();
        status.set(&reg, Status::Success).unwrap();

        let dev = reg.get(TOUCH).unwrap();
        let mut state = dev.lock().unwrap();
        assert_eq!(state.layer_count(), 2);
        let mut fb = vec![Rgb::BLACK; 16];
        compose(&mut fb, state.layers_mut(), 0);
        assert!(fb.iter().all(|p| *p == Rgb::new(0, 64, 0)));
    }

    #[test]
    fn status_without_touch_device_is_not_found() {
        let reg = Registry::new();
        assert!(StatusIndicator::default().set(&reg, Status::Busy).is_err());
    }
}
