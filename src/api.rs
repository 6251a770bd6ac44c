//! Request handlers: typed parameters in, JSON-ready responses out.
//!
//! Each handler is a plain function over [`LedSystem`] so it can be called
//! from the HTTP layer or directly from tests. Successful responses echo the
//! device and the state that was applied; failures become an [`ApiError`]
//! carrying the error kind and message.
//!
//! ## Rust concepts
//! - `#[serde(untagged)]` to accept several JSON shapes for one parameter
//! - `#[serde(flatten)]` to splice option structs into a request body
//! - `From<LedError> for ApiError` so `?` converts at the boundary

use crate::animation::{list_builtin, list_for_layout};
use crate::color::{Hsv, Rgb, hsv_to_rgb, parse_color};
use crate::correction::{CorrectionConfig, CorrectionPatch};
use crate::error::{ErrorKind, LedError};
use crate::filter::{FILTERS, FilterConfig, FilterOverrides};
use crate::image_overlay::ImageOptions;
use crate::preset::Status;
use crate::qrcode::Ecc;
use crate::snapshot::BootConfig;
use crate::system::{DeviceInfo, LedSystem, QrRequest};
use crate::text::{Align, Scroll, TextOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

// ── Errors ───────────────────────────────────────────────────────────

/// Error body returned by every failing handler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<LedError> for ApiError {
    fn from(e: LedError) -> Self {
        Self {
            kind: e.kind(),
            message: e.message().to_string(),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ── Shared parameter types ───────────────────────────────────────────

/// A color given as `"#RRGGBB"`, a color name, `{r, g, b}` or `0xRRGGBB`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(untagged)]
pub enum ColorParam {
    Text(String),
    Rgb { r: u8, g: u8, b: u8 },
    Value(u32),
}

impl ColorParam {
    pub fn resolve(&self) -> crate::Result<Rgb> {
        match self {
            Self::Text(s) => parse_color(s),
            Self::Rgb { r, g, b } => Ok(Rgb::new(*r, *g, *b)),
            Self::Value(v) if *v <= 0xFF_FFFF => Ok(Rgb::from_u32(*v)),
            Self::Value(v) => Err(LedError::invalid_arg(format!("color value {v:#x} exceeds 0xFFFFFF"))),
        }
    }
}

fn resolve_opt(color: &Option<ColorParam>) -> crate::Result<Option<Rgb>> {
    color.as_ref().map(ColorParam::resolve).transpose()
}

fn default_matrix() -> String {
    "matrix".to_string()
}

#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
pub struct DeviceParams {
    /// Device name: `touch`, `board`, `matrix` or an internal name
    #[schema(example = "touch")]
    pub device: String,
}

#[derive(Clone, Debug, Default, Deserialize, utoipa::IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Query)]
pub struct OptionalDeviceParams {
    pub device: Option<String>,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct StoppedResponse {
    pub device: String,
    pub stopped: bool,
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ListResponse {
    pub devices: Vec<DeviceInfo>,
}

pub fn list(system: &LedSystem) -> ListResponse {
    ListResponse {
        devices: system.devices(),
    }
}

#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
pub struct BrightnessParams {
    #[schema(example = "board")]
    pub device: String,
    /// 0-255; omit to read the current value
    #[schema(example = 128)]
    pub brightness: Option<u8>,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct BrightnessResponse {
    pub device: String,
    pub brightness: u8,
}

pub fn brightness(system: &LedSystem, p: BrightnessParams) -> ApiResult<BrightnessResponse> {
    let brightness = system.brightness(&p.device, p.brightness)?;
    Ok(BrightnessResponse {
        device: p.device,
        brightness,
    })
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct ClearResponse {
    pub device: String,
    pub cleared: bool,
}

pub fn clear(system: &LedSystem, p: DeviceParams) -> ApiResult<ClearResponse> {
    system.clear(&p.device)?;
    Ok(ClearResponse {
        device: p.device,
        cleared: true,
    })
}

#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
pub struct SetParams {
    pub device: String,
    /// First pixel; omit to paint the whole device
    pub index: Option<usize>,
    /// Defaults to 1 with `index`, otherwise every pixel
    pub count: Option<usize>,
    #[schema(value_type = Object, example = json!({"r": 255, "g": 0, "b": 0}))]
    pub color: ColorParam,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct SetResponse {
    pub device: String,
    pub start: usize,
    pub count: usize,
    pub color: Rgb,
    pub success: bool,
}

pub fn set(system: &LedSystem, p: SetParams) -> ApiResult<SetResponse> {
    let color = p.color.resolve()?;
    let (start, count) = system.set_pixels(&p.device, p.index, p.count, color)?;
    Ok(SetResponse {
        device: p.device,
        start,
        count,
        color,
        success: true,
    })
}

#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
pub struct FillParams {
    #[schema(example = "touch")]
    pub device: String,
    #[schema(value_type = String, example = "#FF0000")]
    pub color: ColorParam,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct FillResponse {
    pub device: String,
    pub color: Rgb,
    pub success: bool,
}

pub fn fill(system: &LedSystem, p: FillParams) -> ApiResult<FillResponse> {
    let color = p.color.resolve()?;
    system.fill(&p.device, color)?;
    Ok(FillResponse {
        device: p.device,
        color,
        success: true,
    })
}

// ── Effects ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct EffectListResponse {
    pub effects: Vec<&'static str>,
}

/// The whole catalog, or what suits one device's layout.
pub fn effect_list(system: &LedSystem, p: OptionalDeviceParams) -> ApiResult<EffectListResponse> {
    let effects = match p.device {
        Some(d) => list_for_layout(system.device(&d)?.layout()),
        None => list_builtin(),
    };
    Ok(EffectListResponse { effects })
}

#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
pub struct EffectStartParams {
    #[schema(example = "board")]
    pub device: String,
    #[schema(example = "rainbow")]
    pub effect: String,
    /// 1-100; omit to keep the effect's own pace
    #[schema(example = 50, minimum = 1, maximum = 100)]
    pub speed: Option<u8>,
    #[schema(value_type = Option<String>, example = "#00FF00")]
    pub color: Option<ColorParam>,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct EffectStartResponse {
    pub device: String,
    pub effect: String,
    pub speed: u8,
    pub started: bool,
}

pub fn effect_start(system: &LedSystem, p: EffectStartParams) -> ApiResult<EffectStartResponse> {
    let color = resolve_opt(&p.color)?;
    let speed = system.start_effect(&p.device, &p.effect, p.speed, color)?;
    Ok(EffectStartResponse {
        device: p.device,
        effect: p.effect,
        speed,
        started: true,
    })
}

pub fn effect_stop(system: &LedSystem, p: DeviceParams) -> ApiResult<StoppedResponse> {
    system.stop_effect(&p.device)?;
    Ok(StoppedResponse {
        device: p.device,
        stopped: true,
    })
}

// ── Color utilities ──────────────────────────────────────────────────

#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
pub struct ColorParseParams {
    #[schema(value_type = String, example = "orange")]
    pub color: ColorParam,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct ColorParseResponse {
    #[schema(value_type = Object)]
    pub input: ColorParam,
    pub rgb: Rgb,
    pub hex: String,
    pub value: u32,
}

pub fn color_parse(p: ColorParseParams) -> ApiResult<ColorParseResponse> {
    let rgb = p.color.resolve()?;
    Ok(ColorParseResponse {
        input: p.color,
        rgb,
        hex: rgb.to_hex(),
        value: rgb.to_u32(),
    })
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct ColorHsvResponse {
    pub hsv: Hsv,
    pub rgb: Rgb,
    pub hex: String,
}

/// Hue wraps at 360.
pub fn color_hsv(p: Hsv) -> ColorHsvResponse {
    let hsv = Hsv::new(p.h % 360, p.s, p.v);
    let rgb = hsv_to_rgb(hsv);
    ColorHsvResponse {
        hsv,
        rgb,
        hex: rgb.to_hex(),
    }
}

// ── Filters ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct FilterInfo {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct FilterListResponse {
    pub filters: Vec<FilterInfo>,
}

pub fn filter_list() -> FilterListResponse {
    FilterListResponse {
        filters: FILTERS
            .iter()
            .map(|&(name, description)| FilterInfo { name, description })
            .collect(),
    }
}

#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
pub struct FilterStartParams {
    #[schema(example = "matrix")]
    pub device: String,
    #[schema(example = "pulse")]
    pub filter: String,
    #[schema(example = 50, minimum = 1, maximum = 100)]
    pub speed: Option<u8>,
    /// Per-filter parameters overriding the speed-derived defaults
    #[serde(flatten)]
    pub overrides: FilterOverrides,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct FilterStartResponse {
    pub device: String,
    pub filter: &'static str,
    pub speed: u8,
    pub config: FilterConfig,
    pub applied: bool,
}

pub fn filter_start(system: &LedSystem, p: FilterStartParams) -> ApiResult<FilterStartResponse> {
    let (filter, config) = system.start_filter(&p.device, &p.filter, p.speed, &p.overrides)?;
    Ok(FilterStartResponse {
        device: p.device,
        filter,
        speed: p.speed.unwrap_or(crate::system::DEFAULT_SPEED).clamp(1, 100),
        config,
        applied: true,
    })
}

pub fn filter_stop(system: &LedSystem, p: DeviceParams) -> ApiResult<StoppedResponse> {
    system.stop_filter(&p.device)?;
    Ok(StoppedResponse {
        device: p.device,
        stopped: true,
    })
}

// ── Overlays ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
pub struct ImageParams {
    #[serde(default = "default_matrix")]
    #[schema(example = "matrix", default = "matrix")]
    pub device: String,
    /// Image file relative to the media directory
    #[schema(example = "images/logo.png")]
    pub path: String,
    #[serde(flatten)]
    pub options: ImageOptions,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct ImageResponse {
    pub device: String,
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub frames: usize,
    pub animated: bool,
    pub displayed: bool,
}

pub fn image(system: &LedSystem, p: ImageParams) -> ApiResult<ImageResponse> {
    let info = system.show_image(&p.device, &p.path, p.options)?;
    Ok(ImageResponse {
        device: p.device,
        path: p.path,
        width: info.width,
        height: info.height,
        frames: info.frames,
        animated: info.frames > 1,
        displayed: true,
    })
}

#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
pub struct QrCodeParams {
    #[serde(default = "default_matrix")]
    #[schema(example = "matrix", default = "matrix")]
    pub device: String,
    #[schema(example = "https://example.com")]
    pub text: String,
    #[serde(default)]
    pub ecc: Ecc,
    /// Module color; white when omitted
    #[schema(value_type = Option<String>)]
    pub color: Option<ColorParam>,
    /// Background image relative to the media directory
    pub bg_image: Option<String>,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct QrCodeResponse {
    pub device: String,
    pub text: String,
    pub version: u8,
    pub size: u16,
    pub capacity: u16,
    pub displayed: bool,
}

pub fn qrcode(system: &LedSystem, p: QrCodeParams) -> ApiResult<QrCodeResponse> {
    let request = QrRequest {
        ecc: p.ecc,
        color: resolve_opt(&p.color)?,
        bg_image: p.bg_image,
        ..QrRequest::new(p.text.clone())
    };
    let result = system.show_qrcode(&p.device, &request).map_err(|e| match e {
        LedError::InvalidSize(_) => LedError::invalid_arg("Text too long for QR code"),
        other => other,
    })?;
    Ok(QrCodeResponse {
        device: p.device,
        text: p.text,
        version: result.version,
        size: result.size,
        capacity: result.data_capacity,
        displayed: true,
    })
}

fn default_text_speed() -> u8 {
    30
}

#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
pub struct TextParams {
    #[serde(default = "default_matrix")]
    #[schema(example = "matrix", default = "matrix")]
    pub device: String,
    #[schema(example = "Hello")]
    pub text: String,
    /// Font file name without extension; `default` is the CJK font
    #[schema(example = "cjk")]
    pub font: Option<String>,
    #[schema(value_type = Option<String>, example = "white")]
    pub color: Option<ColorParam>,
    #[serde(default)]
    pub align: Align,
    #[serde(default)]
    pub scroll: Scroll,
    /// Scroll speed 1-100
    #[serde(default = "default_text_speed")]
    #[schema(example = 30, default = 30, minimum = 1, maximum = 100)]
    pub speed: u8,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    /// Draw the text inverted where it covers lit base pixels
    #[serde(default)]
    pub invert: bool,
    #[serde(default, rename = "loop")]
    pub loop_scroll: bool,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct TextResponse {
    pub device: String,
    pub text: String,
    pub font: String,
    pub displayed: bool,
}

pub fn text(system: &LedSystem, p: TextParams) -> ApiResult<TextResponse> {
    let opts = TextOptions {
        color: resolve_opt(&p.color)?.unwrap_or(Rgb::WHITE),
        align: p.align,
        scroll: p.scroll,
        scroll_speed: p.speed as u32,
        x: p.x,
        y: p.y,
        invert_on_overlap: p.invert,
        loop_scroll: p.loop_scroll,
    };
    let font = system.show_text(&p.device, &p.text, p.font.as_deref(), opts)?;
    Ok(TextResponse {
        device: p.device,
        text: p.text,
        font,
        displayed: true,
    })
}

pub fn text_stop(system: &LedSystem, p: DeviceParams) -> ApiResult<StoppedResponse> {
    system.stop_text(&p.device)?;
    Ok(StoppedResponse {
        device: p.device,
        stopped: true,
    })
}

#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
pub struct StatusParams {
    pub status: Status,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct StatusResponse {
    pub status: Status,
    pub color: Rgb,
}

pub fn status(system: &LedSystem, p: StatusParams) -> ApiResult<StatusResponse> {
    system.set_status(p.status)?;
    Ok(StatusResponse {
        status: p.status,
        color: p.status.color(),
    })
}

// ── Boot state ───────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct SaveResponse {
    pub device: String,
    pub saved: bool,
    pub animation: Option<String>,
    pub brightness: u8,
    pub speed: Option<u8>,
}

pub fn save(system: &LedSystem, p: DeviceParams) -> ApiResult<SaveResponse> {
    let config = system.save(&p.device)?;
    Ok(SaveResponse {
        device: p.device,
        saved: true,
        animation: config.animation,
        brightness: config.brightness,
        speed: config.speed,
    })
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct BootEntry {
    pub device: &'static str,
    #[serde(flatten)]
    pub config: BootConfig,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct BootConfigResponse {
    pub boot_config: Vec<BootEntry>,
}

pub fn boot_config(system: &LedSystem, p: OptionalDeviceParams) -> ApiResult<BootConfigResponse> {
    let boot_config = system
        .boot_config(p.device.as_deref())?
        .into_iter()
        .map(|(device, config)| BootEntry { device, config })
        .collect();
    Ok(BootConfigResponse { boot_config })
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct BootClearResponse {
    pub device: Option<String>,
    pub cleared: bool,
}

pub fn boot_clear(system: &LedSystem, p: OptionalDeviceParams) -> ApiResult<BootClearResponse> {
    system.clear_boot_config(p.device.as_deref())?;
    Ok(BootClearResponse {
        device: p.device,
        cleared: true,
    })
}

// ── Color correction ─────────────────────────────────────────────────

pub fn color_correction_get(system: &LedSystem) -> CorrectionConfig {
    system.corrector().config()
}

pub fn color_correction_set(system: &LedSystem, patch: CorrectionPatch) -> ApiResult<CorrectionConfig> {
    let config = system.corrector().update(&patch)?;
    debug!("Color correction updated: enabled={}", config.enabled);
    Ok(config)
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

pub fn color_correction_reset(system: &LedSystem) -> ApiResult<SuccessResponse> {
    system.corrector().reset()?;
    Ok(SuccessResponse { success: true })
}

#[derive(Clone, Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct PathParams {
    /// Relative to the config directory; defaults to the portable file there
    #[schema(value_type = Option<String>)]
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct ExportResponse {
    pub success: bool,
    #[schema(value_type = String)]
    pub path: PathBuf,
}

pub fn color_correction_export(system: &LedSystem, p: PathParams) -> ApiResult<ExportResponse> {
    let path = system.corrector().export(p.path.as_deref())?;
    Ok(ExportResponse { success: true, path })
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct ImportResponse {
    pub config: CorrectionConfig,
    pub success: bool,
}

pub fn color_correction_import(system: &LedSystem, p: PathParams) -> ApiResult<ImportResponse> {
    let config = system.corrector().import(p.path.as_deref())?;
    Ok(ImportResponse { config, success: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset;
    use crate::render::render_device;
    use crate::sink::{MemorySink, SinkInit};
    use crate::storage::MemoryKvStore;
    use crate::system::SystemPaths;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn system(dir: &TempDir) -> LedSystem {
        let system = LedSystem::new(
            Arc::new(MemoryKvStore::new()),
            SystemPaths {
                fonts_dir: dir.path().join("fonts"),
                media_dir: dir.path().to_path_buf(),
                config_dir: Some(dir.path().join("config")),
            },
        );
        for config in preset::default_devices() {
            let (sink, _tap) = MemorySink::new(SinkInit::new(config.geometry()));
            system.registry().create_with_sink(config, Box::new(sink)).unwrap();
        }
        system
    }

    fn params<T: serde::de::DeserializeOwned>(v: serde_json::Value) -> T {
        serde_json::from_value(v).unwrap()
    }

    #[rstest]
    #[case(json!("#00FF00"), Rgb::GREEN)]
    #[case(json!("Red"), Rgb::RED)]
    #[case(json!({"r": 1, "g": 2, "b": 3}), Rgb::new(1, 2, 3))]
    #[case(json!(0x0000FF), Rgb::BLUE)]
    fn color_param_shapes(#[case] input: serde_json::Value, #[case] expected: Rgb) {
        let color: ColorParam = params(input);
        assert_eq!(color.resolve().unwrap(), expected);
    }

    #[rstest]
    #[case(json!("#12"))]
    #[case(json!("mauve"))]
    #[case(json!(0x1000000))]
    fn bad_colors_are_invalid(#[case] input: serde_json::Value) {
        let color: ColorParam = params(input);
        assert!(matches!(color.resolve(), Err(LedError::InvalidArg(_))));
    }

    #[test]
    fn color_parse_reports_all_forms() {
        let out = color_parse(params(json!({"color": "orange"}))).unwrap();
        assert_eq!(out.rgb, Rgb::new(255, 165, 0));
        assert_eq!(out.hex, "#FFA500");
        assert_eq!(out.value, 0xFFA500);
    }

    #[test]
    fn color_hsv_converts_primaries() {
        let out = color_hsv(Hsv::new(480, 255, 255));
        assert_eq!(out.hsv.h, 120);
        assert_eq!(out.rgb, Rgb::GREEN);
        assert_eq!(out.hex, "#00FF00");
    }

    #[test]
    fn fill_echoes_device_and_color() {
        let dir = TempDir::new().unwrap();
        let sys = system(&dir);
        let out = fill(&sys, params(json!({"device": "touch", "color": "#FF0000"}))).unwrap();
        assert_eq!(out.device, "touch");
        assert_eq!(out.color, Rgb::RED);
        assert!(out.success);
    }

    #[test]
    fn unknown_device_is_not_found() {
        let dir = TempDir::new().unwrap();
        let sys = system(&dir);
        let err = clear(&sys, params(json!({"device": "lamp"}))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn effect_start_defaults_speed_and_rejects_unknown() {
        let dir = TempDir::new().unwrap();
        let sys = system(&dir);
        let out = effect_start(&sys, params(json!({"device": "board", "effect": "rainbow"}))).unwrap();
        assert_eq!(out.speed, 50);
        assert!(out.started);

        let err = effect_start(&sys, params(json!({"device": "board", "effect": "nope"}))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn effect_list_filters_by_layout() {
        let dir = TempDir::new().unwrap();
        let sys = system(&dir);
        let all = effect_list(&sys, OptionalDeviceParams::default()).unwrap();
        let touch = effect_list(&sys, OptionalDeviceParams { device: Some("touch".into()) }).unwrap();
        assert!(all.effects.contains(&"plasma"));
        assert!(!touch.effects.contains(&"plasma"));
        assert!(touch.effects.len() < all.effects.len());
    }

    #[test]
    fn oversized_qr_is_invalid_argument() {
        let dir = TempDir::new().unwrap();
        let sys = system(&dir);
        fill(&sys, params(json!({"device": "matrix", "color": "blue"}))).unwrap();
        let device = sys.device("matrix").unwrap();
        render_device(&device, 0, sys.corrector()).unwrap();
        let before = device.lock().unwrap().framebuffer().to_vec();

        let err = qrcode(&sys, params(json!({"text": "x".repeat(500), "ecc": "H"}))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArg);
        assert!(err.message.contains("too long"));

        render_device(&device, 16, sys.corrector()).unwrap();
        assert_eq!(device.lock().unwrap().framebuffer(), before.as_slice());
    }

    #[test]
    fn qrcode_reports_version() {
        let dir = TempDir::new().unwrap();
        let sys = system(&dir);
        let out = qrcode(&sys, params(json!({"text": "hello"}))).unwrap();
        assert_eq!(out.device, "matrix");
        assert_eq!(out.version, 1);
        assert_eq!(out.size, 21);
    }

    #[test]
    fn image_on_a_strip_is_rejected() {
        let dir = TempDir::new().unwrap();
        let sys = system(&dir);
        let err = image(&sys, params(json!({"device": "touch", "path": "images/a.png"}))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
    }

    #[test]
    fn filter_start_flattens_overrides() {
        let dir = TempDir::new().unwrap();
        let sys = system(&dir);
        let p: FilterStartParams = params(json!({"device": "board", "filter": "invert", "speed": 200}));
        let out = filter_start(&sys, p).unwrap();
        assert_eq!(out.filter, "invert");
        assert_eq!(out.speed, 100);
        assert!(out.applied);
        assert_eq!(filter_list().filters.len(), FILTERS.len());
    }

    #[test]
    fn save_and_list_boot_config() {
        let dir = TempDir::new().unwrap();
        let sys = system(&dir);
        effect_start(
            &sys,
            params(json!({"device": "touch", "effect": "breathing", "speed": 30, "color": "green"})),
        )
        .unwrap();
        let saved = save(&sys, params(json!({"device": "touch"}))).unwrap();
        assert_eq!(saved.animation.as_deref(), Some("breathing"));
        assert_eq!(saved.speed, Some(30));

        let boot = boot_config(&sys, OptionalDeviceParams::default()).unwrap();
        assert_eq!(boot.boot_config.len(), 1);
        let body = serde_json::to_value(&boot).unwrap();
        assert_eq!(body["boot_config"][0]["device"], "touch");
        assert_eq!(body["boot_config"][0]["animation"], "breathing");

        boot_clear(&sys, OptionalDeviceParams::default()).unwrap();
        assert!(boot_config(&sys, OptionalDeviceParams::default()).unwrap().boot_config.is_empty());
    }

    #[test]
    fn color_correction_round_trip() {
        let dir = TempDir::new().unwrap();
        let sys = system(&dir);
        let patch: CorrectionPatch = params(json!({"enabled": true, "gamma": {"enabled": true, "value": 2.2}}));
        let config = color_correction_set(&sys, patch).unwrap();
        assert!(config.enabled);
        assert_eq!(color_correction_get(&sys), config);

        let exported = color_correction_export(&sys, PathParams::default()).unwrap();
        assert!(exported.path.exists());
        color_correction_reset(&sys).unwrap();
        assert!(!color_correction_get(&sys).enabled);

        let imported = color_correction_import(&sys, PathParams::default()).unwrap();
        assert_eq!(imported.config, config);
    }

    #[test]
    fn import_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let sys = system(&dir);
        let p = PathParams {
            path: Some(PathBuf::from("absent.json")),
        };
        assert_eq!(color_correction_import(&sys, p).unwrap_err().kind, ErrorKind::NotFound);
    }

    #[rstest]
    #[case("/etc/passwd")]
    #[case("../outside.json")]
    fn correction_files_outside_config_dir_are_rejected(#[case] path: &str) {
        let dir = TempDir::new().unwrap();
        let sys = system(&dir);
        let p = || PathParams {
            path: Some(PathBuf::from(path)),
        };
        assert_eq!(color_correction_import(&sys, p()).unwrap_err().kind, ErrorKind::InvalidArg);
        assert_eq!(color_correction_export(&sys, p()).unwrap_err().kind, ErrorKind::InvalidArg);
        assert!(!dir.path().join("outside.json").exists());
    }
}
