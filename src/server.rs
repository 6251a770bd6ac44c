//! HTTP API server: axum router over the handlers in [`crate::api`].
//!
//! Every handler is reachable as `POST /api/v1/led/<name>` with dots in the
//! handler name turned into slashes (`effect.start` → `/api/v1/led/effect/start`).
//! Pure queries are also served with `GET`.
//!
//! The render thread keeps running on its own `std::thread`; handlers only
//! take a device lock for the duration of one mutation. Work that touches
//! the filesystem runs on tokio's blocking pool.
//!
//! ## Rust concepts
//! - axum extractors: `State`, `Json`, `Query`
//! - `IntoResponse` through `(StatusCode, Json<T>)` tuples
//! - `tokio::task::spawn_blocking` for image decoding and file I/O
//! - `tower-http` middleware for tracing and CORS

use crate::api::{self, ApiError, ApiResult};
use crate::color::Hsv;
use crate::correction::{CorrectionConfig, CorrectionPatch};
use crate::error::ErrorKind;
use crate::media::{self, MediaEntry};
use crate::system::LedSystem;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub system: Arc<LedSystem>,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(
        get_list,
        post_brightness,
        post_clear,
        post_set,
        post_fill,
        get_effect_list,
        post_effect_start,
        post_effect_stop,
        post_color_parse,
        post_color_hsv,
        get_filter_list,
        post_filter_start,
        post_filter_stop,
        post_image,
        post_qrcode,
        post_text,
        post_text_stop,
        post_status,
        post_save,
        get_boot_config,
        post_boot_clear,
        get_color_correction,
        post_color_correction_set,
        post_color_correction_reset,
        post_color_correction_export,
        post_color_correction_import,
        get_images,
        get_fonts,
    ),
    components(schemas(
        ApiError,
        ErrorKind,
        api::ColorParam,
        api::DeviceParams,
        api::OptionalDeviceParams,
        api::ListResponse,
        api::BrightnessParams,
        api::BrightnessResponse,
        api::ClearResponse,
        api::SetParams,
        api::SetResponse,
        api::FillParams,
        api::FillResponse,
        api::EffectListResponse,
        api::EffectStartParams,
        api::EffectStartResponse,
        api::StoppedResponse,
        api::ColorParseParams,
        api::ColorParseResponse,
        api::ColorHsvResponse,
        api::FilterListResponse,
        api::FilterInfo,
        api::FilterStartParams,
        api::FilterStartResponse,
        api::ImageParams,
        api::ImageResponse,
        api::QrCodeParams,
        api::QrCodeResponse,
        api::TextParams,
        api::TextResponse,
        api::StatusParams,
        api::StatusResponse,
        api::SaveResponse,
        api::BootEntry,
        api::BootConfigResponse,
        api::BootClearResponse,
        api::SuccessResponse,
        api::PathParams,
        api::ExportResponse,
        api::ImportResponse,
        CorrectionConfig,
        CorrectionPatch,
        Hsv,
        MediaEntry,
    )),
    tags(
        (name = "led", description = "Device content and effects"),
        (name = "color", description = "Color parsing and correction"),
        (name = "boot", description = "Saved boot state"),
        (name = "media", description = "Media discovery endpoints"),
    ),
    info(
        title = "LED Effects API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP API for LED strips, rings and matrices"
    )
)]
pub struct ApiDoc;

// ── Responses ────────────────────────────────────────────────────────

type HandlerResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArg | ErrorKind::Unsupported | ErrorKind::InvalidSize => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidState => StatusCode::CONFLICT,
        ErrorKind::NoMem => StatusCode::INSUFFICIENT_STORAGE,
        ErrorKind::Hardware => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T>(result: ApiResult<T>) -> HandlerResult<T> {
    result
        .map(Json)
        .map_err(|e| (status_for(e.kind), Json(e)))
}

/// Parse an optional JSON body; an empty body means all defaults.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, (StatusCode, Json<ApiError>)> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                kind: ErrorKind::InvalidArg,
                message: e.to_string(),
            }),
        )
    })
}

/// Run a handler on the blocking pool.
async fn blocking<T, F>(state: AppState, f: F) -> HandlerResult<T>
where
    T: Send + 'static,
    F: FnOnce(&LedSystem) -> ApiResult<T> + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || f(&state.system)).await;
    match joined {
        Ok(result) => respond(result),
        Err(e) => respond(Err(ApiError {
            kind: ErrorKind::Hardware,
            message: format!("handler task failed: {e}"),
        })),
    }
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"]).validator_url("none")),
        )
        .route("/api/v1/led/list", get(get_list).post(get_list))
        .route("/api/v1/led/brightness", post(post_brightness))
        .route("/api/v1/led/clear", post(post_clear))
        .route("/api/v1/led/set", post(post_set))
        .route("/api/v1/led/fill", post(post_fill))
        .route("/api/v1/led/effect/list", get(get_effect_list).post(post_effect_list))
        .route("/api/v1/led/effect/start", post(post_effect_start))
        .route("/api/v1/led/effect/stop", post(post_effect_stop))
        .route("/api/v1/led/color/parse", post(post_color_parse))
        .route("/api/v1/led/color/hsv", post(post_color_hsv))
        .route("/api/v1/led/filter/list", get(get_filter_list).post(get_filter_list))
        .route("/api/v1/led/filter/start", post(post_filter_start))
        .route("/api/v1/led/filter/stop", post(post_filter_stop))
        .route("/api/v1/led/image", post(post_image))
        .route("/api/v1/led/qrcode", post(post_qrcode))
        .route("/api/v1/led/text", post(post_text))
        .route("/api/v1/led/text/stop", post(post_text_stop))
        .route("/api/v1/led/status", post(post_status))
        .route("/api/v1/led/save", post(post_save))
        .route("/api/v1/led/boot/config", get(get_boot_config).post(post_boot_config))
        .route("/api/v1/led/boot/clear", post(post_boot_clear))
        .route(
            "/api/v1/led/color_correction/get",
            get(get_color_correction).post(get_color_correction),
        )
        .route("/api/v1/led/color_correction/set", post(post_color_correction_set))
        .route("/api/v1/led/color_correction/reset", post(post_color_correction_reset))
        .route("/api/v1/led/color_correction/export", post(post_color_correction_export))
        .route("/api/v1/led/color_correction/import", post(post_color_correction_import))
        .route("/api/v1/images", get(get_images))
        .route("/api/v1/fonts", get(get_fonts))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Device handlers ──────────────────────────────────────────────────

/// List devices with their geometry, effects and current content
#[utoipa::path(
    get,
    path = "/api/v1/led/list",
    tag = "led",
    responses((status = 200, description = "All registered devices", body = api::ListResponse))
)]
async fn get_list(State(state): State<AppState>) -> Json<api::ListResponse> {
    Json(api::list(&state.system))
}

/// Read or set a device's brightness
#[utoipa::path(
    post,
    path = "/api/v1/led/brightness",
    tag = "led",
    request_body = api::BrightnessParams,
    responses(
        (status = 200, description = "Brightness in effect", body = api::BrightnessResponse),
        (status = 404, description = "Unknown device", body = ApiError)
    )
)]
async fn post_brightness(
    State(state): State<AppState>,
    Json(p): Json<api::BrightnessParams>,
) -> HandlerResult<api::BrightnessResponse> {
    respond(api::brightness(&state.system, p))
}

/// Stop the base-layer effect and blank it
#[utoipa::path(
    post,
    path = "/api/v1/led/clear",
    tag = "led",
    request_body = api::DeviceParams,
    responses(
        (status = 200, description = "Device cleared", body = api::ClearResponse),
        (status = 404, description = "Unknown device", body = ApiError)
    )
)]
async fn post_clear(
    State(state): State<AppState>,
    Json(p): Json<api::DeviceParams>,
) -> HandlerResult<api::ClearResponse> {
    respond(api::clear(&state.system, p))
}

/// Paint a run of pixels
#[utoipa::path(
    post,
    path = "/api/v1/led/set",
    tag = "led",
    request_body = api::SetParams,
    responses(
        (status = 200, description = "Pixels written", body = api::SetResponse),
        (status = 400, description = "Range outside the device or bad color", body = ApiError),
        (status = 404, description = "Unknown device", body = ApiError)
    )
)]
async fn post_set(
    State(state): State<AppState>,
    Json(p): Json<api::SetParams>,
) -> HandlerResult<api::SetResponse> {
    respond(api::set(&state.system, p))
}

/// Fill a device with one color
#[utoipa::path(
    post,
    path = "/api/v1/led/fill",
    tag = "led",
    request_body = api::FillParams,
    responses(
        (status = 200, description = "Device filled", body = api::FillResponse),
        (status = 400, description = "Bad color", body = ApiError),
        (status = 404, description = "Unknown device", body = ApiError)
    )
)]
async fn post_fill(
    State(state): State<AppState>,
    Json(p): Json<api::FillParams>,
) -> HandlerResult<api::FillResponse> {
    respond(api::fill(&state.system, p))
}

// ── Effect handlers ──────────────────────────────────────────────────

/// List effects, optionally only those suited to one device
#[utoipa::path(
    get,
    path = "/api/v1/led/effect/list",
    tag = "led",
    params(api::OptionalDeviceParams),
    responses(
        (status = 200, description = "Effect names", body = api::EffectListResponse),
        (status = 404, description = "Unknown device", body = ApiError)
    )
)]
async fn get_effect_list(
    State(state): State<AppState>,
    Query(p): Query<api::OptionalDeviceParams>,
) -> HandlerResult<api::EffectListResponse> {
    respond(api::effect_list(&state.system, p))
}

async fn post_effect_list(
    State(state): State<AppState>,
    body: Bytes,
) -> HandlerResult<api::EffectListResponse> {
    let p: api::OptionalDeviceParams = optional_body(&body)?;
    respond(api::effect_list(&state.system, p))
}

/// Start an effect on the base layer
#[utoipa::path(
    post,
    path = "/api/v1/led/effect/start",
    tag = "led",
    request_body = api::EffectStartParams,
    responses(
        (status = 200, description = "Effect running", body = api::EffectStartResponse),
        (status = 404, description = "Unknown device or effect", body = ApiError)
    )
)]
async fn post_effect_start(
    State(state): State<AppState>,
    Json(p): Json<api::EffectStartParams>,
) -> HandlerResult<api::EffectStartResponse> {
    respond(api::effect_start(&state.system, p))
}

/// Stop the base-layer effect, keeping its last frame
#[utoipa::path(
    post,
    path = "/api/v1/led/effect/stop",
    tag = "led",
    request_body = api::DeviceParams,
    responses(
        (status = 200, description = "Effect stopped", body = api::StoppedResponse),
        (status = 404, description = "Unknown device", body = ApiError)
    )
)]
async fn post_effect_stop(
    State(state): State<AppState>,
    Json(p): Json<api::DeviceParams>,
) -> HandlerResult<api::StoppedResponse> {
    respond(api::effect_stop(&state.system, p))
}

// ── Color handlers ───────────────────────────────────────────────────

/// Parse a color in any accepted form
#[utoipa::path(
    post,
    path = "/api/v1/led/color/parse",
    tag = "color",
    request_body = api::ColorParseParams,
    responses(
        (status = 200, description = "Parsed color", body = api::ColorParseResponse),
        (status = 400, description = "Unparseable color", body = ApiError)
    )
)]
async fn post_color_parse(Json(p): Json<api::ColorParseParams>) -> HandlerResult<api::ColorParseResponse> {
    respond(api::color_parse(p))
}

/// Convert HSV to RGB
#[utoipa::path(
    post,
    path = "/api/v1/led/color/hsv",
    tag = "color",
    request_body = Hsv,
    responses((status = 200, description = "Converted color", body = api::ColorHsvResponse))
)]
async fn post_color_hsv(Json(p): Json<Hsv>) -> Json<api::ColorHsvResponse> {
    Json(api::color_hsv(p))
}

// ── Filter handlers ──────────────────────────────────────────────────

/// List post-processing filters
#[utoipa::path(
    get,
    path = "/api/v1/led/filter/list",
    tag = "led",
    responses((status = 200, description = "Filter names and descriptions", body = api::FilterListResponse))
)]
async fn get_filter_list() -> Json<api::FilterListResponse> {
    Json(api::filter_list())
}

/// Attach a filter to the base layer
#[utoipa::path(
    post,
    path = "/api/v1/led/filter/start",
    tag = "led",
    request_body = api::FilterStartParams,
    responses(
        (status = 200, description = "Filter applied", body = api::FilterStartResponse),
        (status = 404, description = "Unknown device or filter", body = ApiError)
    )
)]
async fn post_filter_start(
    State(state): State<AppState>,
    Json(p): Json<api::FilterStartParams>,
) -> HandlerResult<api::FilterStartResponse> {
    respond(api::filter_start(&state.system, p))
}

/// Remove the base-layer filter
#[utoipa::path(
    post,
    path = "/api/v1/led/filter/stop",
    tag = "led",
    request_body = api::DeviceParams,
    responses(
        (status = 200, description = "Filter removed", body = api::StoppedResponse),
        (status = 404, description = "Unknown device", body = ApiError)
    )
)]
async fn post_filter_stop(
    State(state): State<AppState>,
    Json(p): Json<api::DeviceParams>,
) -> HandlerResult<api::StoppedResponse> {
    respond(api::filter_stop(&state.system, p))
}

// ── Overlay handlers ─────────────────────────────────────────────────

/// Show an image on the matrix
#[utoipa::path(
    post,
    path = "/api/v1/led/image",
    tag = "led",
    request_body = api::ImageParams,
    responses(
        (status = 200, description = "Image displayed", body = api::ImageResponse),
        (status = 400, description = "Not a matrix, or path outside the media directory", body = ApiError),
        (status = 404, description = "Image not found", body = ApiError)
    )
)]
async fn post_image(State(state): State<AppState>, Json(p): Json<api::ImageParams>) -> HandlerResult<api::ImageResponse> {
    blocking(state, move |system| api::image(system, p)).await
}

/// Show a QR code on the matrix
#[utoipa::path(
    post,
    path = "/api/v1/led/qrcode",
    tag = "led",
    request_body = api::QrCodeParams,
    responses(
        (status = 200, description = "QR code displayed", body = api::QrCodeResponse),
        (status = 400, description = "Text too long or not a matrix", body = ApiError),
        (status = 404, description = "Background image not found", body = ApiError)
    )
)]
async fn post_qrcode(
    State(state): State<AppState>,
    Json(p): Json<api::QrCodeParams>,
) -> HandlerResult<api::QrCodeResponse> {
    blocking(state, move |system| api::qrcode(system, p)).await
}

/// Start a text overlay on the matrix
#[utoipa::path(
    post,
    path = "/api/v1/led/text",
    tag = "led",
    request_body = api::TextParams,
    responses(
        (status = 200, description = "Text displayed", body = api::TextResponse),
        (status = 400, description = "Not a matrix", body = ApiError),
        (status = 404, description = "Font not found", body = ApiError)
    )
)]
async fn post_text(State(state): State<AppState>, Json(p): Json<api::TextParams>) -> HandlerResult<api::TextResponse> {
    blocking(state, move |system| api::text(system, p)).await
}

/// Remove the text overlay
#[utoipa::path(
    post,
    path = "/api/v1/led/text/stop",
    tag = "led",
    request_body = api::DeviceParams,
    responses(
        (status = 200, description = "Text removed", body = api::StoppedResponse),
        (status = 404, description = "Unknown device", body = ApiError)
    )
)]
async fn post_text_stop(
    State(state): State<AppState>,
    Json(p): Json<api::DeviceParams>,
) -> HandlerResult<api::StoppedResponse> {
    respond(api::text_stop(&state.system, p))
}

/// Set the touch-strip status indicator
#[utoipa::path(
    post,
    path = "/api/v1/led/status",
    tag = "led",
    request_body = api::StatusParams,
    responses(
        (status = 200, description = "Indicator updated", body = api::StatusResponse),
        (status = 404, description = "No touch device", body = ApiError)
    )
)]
async fn post_status(
    State(state): State<AppState>,
    Json(p): Json<api::StatusParams>,
) -> HandlerResult<api::StatusResponse> {
    respond(api::status(&state.system, p))
}

// ── Boot state handlers ──────────────────────────────────────────────

/// Save a device's current content as its boot state
#[utoipa::path(
    post,
    path = "/api/v1/led/save",
    tag = "boot",
    request_body = api::DeviceParams,
    responses(
        (status = 200, description = "Boot state saved", body = api::SaveResponse),
        (status = 404, description = "Unknown device", body = ApiError)
    )
)]
async fn post_save(State(state): State<AppState>, Json(p): Json<api::DeviceParams>) -> HandlerResult<api::SaveResponse> {
    blocking(state, move |system| api::save(system, p)).await
}

/// Saved boot records
#[utoipa::path(
    get,
    path = "/api/v1/led/boot/config",
    tag = "boot",
    params(api::OptionalDeviceParams),
    responses(
        (status = 200, description = "Saved records", body = api::BootConfigResponse),
        (status = 404, description = "Unknown device", body = ApiError)
    )
)]
async fn get_boot_config(
    State(state): State<AppState>,
    Query(p): Query<api::OptionalDeviceParams>,
) -> HandlerResult<api::BootConfigResponse> {
    blocking(state, move |system| api::boot_config(system, p)).await
}

async fn post_boot_config(
    State(state): State<AppState>,
    body: Bytes,
) -> HandlerResult<api::BootConfigResponse> {
    let p: api::OptionalDeviceParams = optional_body(&body)?;
    blocking(state, move |system| api::boot_config(system, p)).await
}

/// Erase one device's boot record, or all of them
#[utoipa::path(
    post,
    path = "/api/v1/led/boot/clear",
    tag = "boot",
    request_body = api::OptionalDeviceParams,
    responses(
        (status = 200, description = "Records erased", body = api::BootClearResponse),
        (status = 400, description = "Unknown device", body = ApiError)
    )
)]
async fn post_boot_clear(
    State(state): State<AppState>,
    body: Bytes,
) -> HandlerResult<api::BootClearResponse> {
    let p: api::OptionalDeviceParams = optional_body(&body)?;
    blocking(state, move |system| api::boot_clear(system, p)).await
}

// ── Color correction handlers ────────────────────────────────────────

/// Current color correction config
#[utoipa::path(
    get,
    path = "/api/v1/led/color_correction/get",
    tag = "color",
    responses((status = 200, description = "Active config", body = CorrectionConfig))
)]
async fn get_color_correction(State(state): State<AppState>) -> Json<CorrectionConfig> {
    Json(api::color_correction_get(&state.system))
}

/// Patch the color correction config
#[utoipa::path(
    post,
    path = "/api/v1/led/color_correction/set",
    tag = "color",
    request_body = CorrectionPatch,
    responses(
        (status = 200, description = "Updated config", body = CorrectionConfig),
        (status = 400, description = "Out-of-range value", body = ApiError)
    )
)]
async fn post_color_correction_set(
    State(state): State<AppState>,
    Json(patch): Json<CorrectionPatch>,
) -> HandlerResult<CorrectionConfig> {
    blocking(state, move |system| api::color_correction_set(system, patch)).await
}

/// Restore the default (disabled) correction
#[utoipa::path(
    post,
    path = "/api/v1/led/color_correction/reset",
    tag = "color",
    responses((status = 200, description = "Reset", body = api::SuccessResponse))
)]
async fn post_color_correction_reset(State(state): State<AppState>) -> HandlerResult<api::SuccessResponse> {
    blocking(state, api::color_correction_reset).await
}

/// Write the portable correction file
#[utoipa::path(
    post,
    path = "/api/v1/led/color_correction/export",
    tag = "color",
    request_body = api::PathParams,
    responses(
        (status = 200, description = "File written", body = api::ExportResponse),
        (status = 400, description = "No path and no config directory", body = ApiError)
    )
)]
async fn post_color_correction_export(
    State(state): State<AppState>,
    body: Bytes,
) -> HandlerResult<api::ExportResponse> {
    let p: api::PathParams = optional_body(&body)?;
    blocking(state, move |system| api::color_correction_export(system, p)).await
}

/// Load a portable correction file
#[utoipa::path(
    post,
    path = "/api/v1/led/color_correction/import",
    tag = "color",
    request_body = api::PathParams,
    responses(
        (status = 200, description = "Config imported", body = api::ImportResponse),
        (status = 404, description = "File not found", body = ApiError)
    )
)]
async fn post_color_correction_import(
    State(state): State<AppState>,
    body: Bytes,
) -> HandlerResult<api::ImportResponse> {
    let p: api::PathParams = optional_body(&body)?;
    blocking(state, move |system| api::color_correction_import(system, p)).await
}

// ── Media discovery ──────────────────────────────────────────────────

/// GET /api/v1/images: list available images
#[utoipa::path(
    get,
    path = "/api/v1/images",
    tag = "media",
    responses((status = 200, description = "List of available images", body = Vec<MediaEntry>))
)]
async fn get_images(State(state): State<AppState>) -> Json<Vec<MediaEntry>> {
    Json(media::list_images(state.system.media_dir()))
}

/// GET /api/v1/fonts: list available fonts
#[utoipa::path(
    get,
    path = "/api/v1/fonts",
    tag = "media",
    responses((status = 200, description = "List of available font names", body = Vec<String>))
)]
async fn get_fonts(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(media::list_fonts(state.system.fonts_dir()))
}
