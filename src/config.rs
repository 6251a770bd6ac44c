//! Startup configuration: an optional JSON file overlaid by CLI flags.
//!
//! Without a file the defaults bring up the three preset devices with
//! in-memory sinks, which is what a headless run or a test wants. Flags
//! always win over the file.
//!
//! ## Rust concepts
//! - `clap` derive for the command line
//! - `#[serde(default = "...")]` so a config file only names what it changes
//! - `Option<T>` flags that overlay only when given

use crate::device::DeviceConfig;
use crate::error::{LedError, Result};
use crate::geometry::Layout;
use crate::preset;
use crate::render::DEFAULT_FPS;
use crate::sink::OutputConfig;
use crate::system::SystemPaths;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn default_port() -> u16 {
    8080
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_fonts_dir() -> PathBuf {
    PathBuf::from("fonts")
}

fn default_media_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_restore() -> bool {
    true
}

/// LED effects HTTP API server
#[derive(Parser, Debug, Default)]
#[command(name = "led-effects-rs")]
#[command(about = "HTTP API server for LED strips, rings and matrices")]
#[command(version)]
pub struct CliArgs {
    /// JSON system config; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for saved boot state and color correction
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Directory for the portable color correction file
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// Directory of bitmap fonts (<name>.fnt)
    #[arg(long)]
    pub fonts_dir: Option<PathBuf>,

    /// Root directory containing images/
    #[arg(long)]
    pub media_dir: Option<PathBuf>,

    /// Render frames per second
    #[arg(long)]
    pub fps: Option<u32>,

    /// Matrix columns
    #[arg(long)]
    pub matrix_width: Option<u16>,

    /// Matrix rows
    #[arg(long)]
    pub matrix_height: Option<u16>,

    /// SPI device driving the touch strip
    #[arg(long)]
    pub spi_touch: Option<PathBuf>,

    /// SPI device driving the board ring
    #[arg(long)]
    pub spi_board: Option<PathBuf>,

    /// SPI device driving the matrix
    #[arg(long)]
    pub spi_matrix: Option<PathBuf>,

    /// Skip replaying saved boot state
    #[arg(long)]
    pub no_restore: bool,
}

/// Everything the binary needs to start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
    #[serde(default = "default_fonts_dir")]
    pub fonts_dir: PathBuf,
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    #[serde(default = "preset::default_devices")]
    pub devices: Vec<DeviceConfig>,
    #[serde(default = "default_restore")]
    pub restore: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            fps: default_fps(),
            state_dir: default_state_dir(),
            config_dir: None,
            fonts_dir: default_fonts_dir(),
            media_dir: default_media_dir(),
            devices: preset::default_devices(),
            restore: default_restore(),
        }
    }
}

impl SystemConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| LedError::not_found(format!("config {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)?;
        info!("Loaded config from {} ({} devices)", path.display(), config.devices.len());
        Ok(config)
    }

    /// The file named by `--config` (or defaults), then every given flag.
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(args);
        Ok(config)
    }

    fn apply(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(fps) = args.fps {
            self.fps = fps;
        }
        if let Some(dir) = &args.state_dir {
            self.state_dir = dir.clone();
        }
        if args.config_dir.is_some() {
            self.config_dir = args.config_dir.clone();
        }
        if let Some(dir) = &args.fonts_dir {
            self.fonts_dir = dir.clone();
        }
        if let Some(dir) = &args.media_dir {
            self.media_dir = dir.clone();
        }
        if args.no_restore {
            self.restore = false;
        }

        if args.matrix_width.is_some() || args.matrix_height.is_some() {
            match self.device_mut(preset::MATRIX) {
                Some(matrix) if matrix.layout == Layout::Matrix => {
                    matrix.width = args.matrix_width.unwrap_or(matrix.width);
                    matrix.height = args.matrix_height.unwrap_or(matrix.height);
                }
                _ => warn!("No {} device configured; matrix size flags ignored", preset::MATRIX),
            }
        }

        for (name, spi) in [
            (preset::TOUCH, &args.spi_touch),
            (preset::BOARD, &args.spi_board),
            (preset::MATRIX, &args.spi_matrix),
        ] {
            let Some(path) = spi else { continue };
            match self.device_mut(name) {
                Some(device) => device.output = OutputConfig::Spi { device: path.clone() },
                None => warn!("No {} device configured; SPI flag ignored", name),
            }
        }
    }

    fn device_mut(&mut self, name: &str) -> Option<&mut DeviceConfig> {
        self.devices.iter_mut().find(|d| d.name == name)
    }

    pub fn paths(&self) -> SystemPaths {
        SystemPaths {
            fonts_dir: self.fonts_dir.clone(),
            media_dir: self.media_dir.clone(),
            config_dir: self.config_dir.clone(),
        }
    }
}
