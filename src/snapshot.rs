//! What each preset device is showing, and the boot record saved from it.
//!
//! Request handlers record every content change here. `save` turns the
//! current record into a [`BootConfig`] under `led_boot/<short name>`; the
//! system replays it on the next start.

use crate::color::Rgb;
use crate::error::{LedError, Result};
use crate::filter::FilterConfig;
use crate::preset;
use crate::storage::{KvStore, get_json, set_json};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

pub const BOOT_NAMESPACE: &str = "led_boot";

pub const DEFAULT_FILTER_SPEED: u8 = 50;

fn default_filter_speed() -> u8 {
    DEFAULT_FILTER_SPEED
}

// ── Current state ────────────────────────────────────────────────────

/// Live content record for one preset device.
#[derive(Clone, Debug, PartialEq, Serialize, utoipa::ToSchema)]
pub struct CurrentState {
    pub animation: Option<String>,
    /// `None` runs the effect at its own interval.
    pub speed: Option<u8>,
    pub color: Option<Rgb>,
    pub filter: Option<String>,
    pub filter_speed: u8,
    pub filter_config: Option<FilterConfig>,
    pub image_path: Option<String>,
    pub qrcode_text: Option<String>,
    pub qrcode_bg: Option<String>,
    /// Text overlay content; shown by `list`, never persisted.
    pub text: Option<String>,
}

impl Default for CurrentState {
    fn default() -> Self {
        Self {
            animation: None,
            speed: None,
            color: None,
            filter: None,
            filter_speed: DEFAULT_FILTER_SPEED,
            filter_config: None,
            image_path: None,
            qrcode_text: None,
            qrcode_bg: None,
            text: None,
        }
    }
}

impl CurrentState {
    pub fn set_animation(&mut self, name: &str, speed: Option<u8>) {
        self.animation = Some(name.to_string());
        self.speed = speed;
    }

    pub fn clear_animation(&mut self) {
        self.animation = None;
    }

    pub fn set_color(&mut self, color: Rgb) {
        self.color = Some(color);
    }

    pub fn clear_color(&mut self) {
        self.color = None;
    }

    pub fn set_filter(&mut self, name: &str, speed: u8, config: FilterConfig) {
        self.filter = Some(name.to_string());
        self.filter_speed = speed;
        self.filter_config = Some(config);
    }

    pub fn clear_filter(&mut self) {
        self.filter = None;
        self.filter_config = None;
    }

    pub fn set_image(&mut self, path: &str) {
        self.image_path = Some(path.to_string());
    }

    pub fn clear_image(&mut self) {
        self.image_path = None;
    }

    pub fn set_qrcode(&mut self, text: &str, background: Option<&str>) {
        self.qrcode_text = Some(text.to_string());
        self.qrcode_bg = background.map(str::to_string);
    }

    pub fn clear_qrcode(&mut self) {
        self.qrcode_text = None;
        self.qrcode_bg = None;
    }

    pub fn set_text(&mut self, text: &str) {
        self.text = Some(text.to_string());
    }

    pub fn clear_text(&mut self) {
        self.text = None;
    }

    /// Boot record for this state at `brightness`.
    pub fn to_boot_config(&self, brightness: u8) -> BootConfig {
        BootConfig {
            enabled: true,
            animation: self.animation.clone(),
            filter: self.filter.clone(),
            image_path: self.image_path.clone(),
            qrcode_text: self.qrcode_text.clone(),
            qrcode_bg: self.qrcode_bg.clone(),
            color: self.color,
            speed: self.speed,
            filter_speed: self.filter_speed,
            brightness,
            filter_config: self.filter_config,
        }
    }
}

// ── Persisted record ─────────────────────────────────────────────────

/// What a device restores at boot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BootConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub animation: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub qrcode_text: Option<String>,
    #[serde(default)]
    pub qrcode_bg: Option<String>,
    #[serde(default)]
    pub color: Option<Rgb>,
    #[serde(default)]
    pub speed: Option<u8>,
    #[serde(default = "default_filter_speed")]
    pub filter_speed: u8,
    pub brightness: u8,
    #[serde(default)]
    pub filter_config: Option<FilterConfig>,
}

/// The content a boot record brings back, in restore priority.
#[derive(Clone, Debug, PartialEq)]
pub enum Restore<'a> {
    Image(&'a str),
    QrCode { text: &'a str, background: Option<&'a str> },
    Animation {
        name: &'a str,
        speed: Option<u8>,
        color: Option<Rgb>,
    },
    Fill(Rgb),
    Nothing,
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

impl BootConfig {
    /// Image wins over QR code, QR code over animation, animation over a
    /// plain fill.
    pub fn restore(&self) -> Restore<'_> {
        if let Some(path) = non_empty(&self.image_path) {
            Restore::Image(path)
        } else if let Some(text) = non_empty(&self.qrcode_text) {
            Restore::QrCode {
                text,
                background: non_empty(&self.qrcode_bg),
            }
        } else if let Some(name) = non_empty(&self.animation) {
            Restore::Animation {
                name,
                speed: self.speed,
                color: self.color,
            }
        } else if let Some(color) = self.color {
            Restore::Fill(color)
        } else {
            Restore::Nothing
        }
    }

    /// The filter to reapply after the content, if one was saved.
    pub fn saved_filter(&self) -> Option<(&str, FilterConfig)> {
        let name = non_empty(&self.filter)?;
        self.filter_config.map(|c| (name, c))
    }
}

// ── Snapshot store ───────────────────────────────────────────────────

fn slot(device: &str) -> Result<(usize, &'static str)> {
    let short = preset::short_name(device)
        .ok_or_else(|| LedError::invalid_arg(format!("unknown device {device:?}")))?;
    let index = preset::SHORT_NAMES
        .iter()
        .position(|n| *n == short)
        .unwrap_or_default();
    Ok((index, short))
}

pub struct Snapshot {
    store: Arc<dyn KvStore>,
    current: Mutex<[CurrentState; 3]>,
}

impl Snapshot {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            current: Mutex::new(Default::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, [CurrentState; 3]> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mutate the record of a preset device. Other devices are ignored.
    pub fn update(&self, device: &str, f: impl FnOnce(&mut CurrentState)) {
        if let Ok((index, _)) = slot(device) {
            f(&mut self.lock()[index]);
        }
    }

    pub fn current(&self, device: &str) -> Result<CurrentState> {
        let (index, _) = slot(device)?;
        Ok(self.lock()[index].clone())
    }

    /// Persist the current record of `device` with `brightness`.
    pub fn save(&self, device: &str, brightness: u8) -> Result<BootConfig> {
        let (index, short) = slot(device)?;
        let config = self.lock()[index].to_boot_config(brightness);
        set_json(self.store.as_ref(), BOOT_NAMESPACE, short, &config)?;
        info!(
            "Saved boot config for {}: animation={:?} image={:?} qrcode={:?} filter={:?}",
            short, config.animation, config.image_path, config.qrcode_text, config.filter
        );
        Ok(config)
    }

    pub fn get(&self, device: &str) -> Result<Option<BootConfig>> {
        let (_, short) = slot(device)?;
        get_json(self.store.as_ref(), BOOT_NAMESPACE, short)
    }

    /// Erase one device's record, or all of them with `None`.
    pub fn clear(&self, device: Option<&str>) -> Result<()> {
        match device {
            Some(d) => {
                let (_, short) = slot(d)?;
                self.store.erase(BOOT_NAMESPACE, short)?;
                debug!("Cleared boot config for {}", short);
            }
            None => {
                for short in preset::SHORT_NAMES {
                    self.store.erase(BOOT_NAMESPACE, short)?;
                }
                debug!("Cleared all boot configs");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn snapshot() -> Snapshot {
        Snapshot::new(Arc::new(MemoryKvStore::new()))
    }

    #[test]
    fn aliases_share_one_record() {
        let snap = snapshot();
        snap.update("touch", |s| s.set_animation("breathing", Some(30)));
        assert_eq!(
            snap.current("led_touch").unwrap().animation.as_deref(),
            Some("breathing")
        );
        assert!(matches!(snap.current("strip9"), Err(LedError::InvalidArg(_))));
    }

    #[test]
    fn save_round_trips_through_store() {
        let snap = snapshot();
        snap.update("touch", |s| {
            s.set_animation("breathing", Some(30));
            s.set_color(Rgb::GREEN);
            s.set_text("not persisted");
        });
        let saved = snap.save("touch", 80).unwrap();
        assert_eq!(snap.get("touch").unwrap(), Some(saved.clone()));
        assert_eq!(saved.brightness, 80);
        assert_eq!(
            saved.restore(),
            Restore::Animation {
                name: "breathing",
                speed: Some(30),
                color: Some(Rgb::GREEN)
            }
        );
        assert!(snap.get("board").unwrap().is_none());
    }

    #[rstest]
    #[case(Some("images/a.png"), Some("hi"), Some("fire"), Some(Rgb::RED), "image")]
    #[case(None, Some("hi"), Some("fire"), Some(Rgb::RED), "qrcode")]
    #[case(Some(""), None, Some("fire"), Some(Rgb::RED), "animation")]
    #[case(None, None, None, Some(Rgb::RED), "fill")]
    #[case(None, None, None, None, "nothing")]
    fn restore_priority(
        #[case] image: Option<&str>,
        #[case] qr: Option<&str>,
        #[case] animation: Option<&str>,
        #[case] color: Option<Rgb>,
        #[case] expected: &str,
    ) {
        let mut state = CurrentState::default();
        state.image_path = image.map(str::to_string);
        state.qrcode_text = qr.map(str::to_string);
        state.animation = animation.map(str::to_string);
        state.color = color;
        let kind = match state.to_boot_config(10).restore() {
            Restore::Image(_) => "image",
            Restore::QrCode { .. } => "qrcode",
            Restore::Animation { .. } => "animation",
            Restore::Fill(_) => "fill",
            Restore::Nothing => "nothing",
        };
        assert_eq!(kind, expected);
    }

    #[test]
    fn filter_needs_name_and_config() {
        let mut state = CurrentState::default();
        state.set_filter("invert", 40, FilterConfig::Invert);
        let boot = state.to_boot_config(1);
        assert_eq!(boot.saved_filter(), Some(("invert", FilterConfig::Invert)));
        assert_eq!(boot.filter_speed, 40);

        state.clear_filter();
        assert_eq!(state.to_boot_config(1).saved_filter(), None);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let boot: BootConfig = serde_json::from_str(r#"{"brightness": 9}"#).unwrap();
        assert!(!boot.enabled);
        assert_eq!(boot.speed, None);
        assert_eq!(boot.filter_speed, DEFAULT_FILTER_SPEED);
        assert_eq!(boot.restore(), Restore::Nothing);
    }

    #[rstest]
    #[case(r#"{"brightness": 1, "animation": "chase", "speed": 70}"#, Some(70))]
    #[case(r#"{"brightness": 1, "animation": "chase", "speed": null}"#, None)]
    #[case(r#"{"brightness": 1, "animation": "chase"}"#, None)]
    fn animation_speed_is_optional(#[case] json: &str, #[case] speed: Option<u8>) {
        let boot: BootConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            boot.restore(),
            Restore::Animation {
                name: "chase",
                speed,
                color: None
            }
        );
    }

    #[test]
    fn clear_one_and_all() {
        let snap = snapshot();
        for d in preset::SHORT_NAMES {
            snap.save(d, 1).unwrap();
        }
        snap.clear(Some("matrix")).unwrap();
        assert!(snap.get("matrix").unwrap().is_none());
        assert!(snap.get("touch").unwrap().is_some());
        snap.clear(None).unwrap();
        assert!(snap.get("touch").unwrap().is_none());
        assert!(snap.get("board").unwrap().is_none());
    }
}
