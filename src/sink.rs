//! Output sinks: where a finished frame goes.
//!
//! Every device ships its frame through exactly one sink. A sink receives
//! pixels in wire order with `set_pixel`, and `refresh` latches the frame.
//! Bytes on the wire are GRB.
//!
//! ## Rust concepts
//! - Trait objects (`Box<dyn OutputSink>`) so a device doesn't care what's behind it
//! - `Send` bound because the render thread owns the sink while a request thread built it
//! - Generic `SpiSink<W: Write>`: anything writable works, a spidev node or a `Vec<u8>`

use crate::error::{LedError, Result};
use crate::geometry::Geometry;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Devices above this many LEDs use the bulk (DMA) output path.
pub const BULK_THRESHOLD: usize = 256;

/// Which peripheral path a sink should use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SinkPath {
    /// One contiguous DMA transfer per frame.
    Bulk,
    /// Small frames pushed directly.
    LowLatency,
}

impl SinkPath {
    pub fn for_led_count(led_count: usize) -> Self {
        if led_count > BULK_THRESHOLD {
            Self::Bulk
        } else {
            Self::LowLatency
        }
    }
}

/// What a sink is initialized against.
#[derive(Clone, Copy, Debug)]
pub struct SinkInit {
    pub geometry: Geometry,
    pub path: SinkPath,
}

impl SinkInit {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            path: SinkPath::for_led_count(geometry.led_count()),
        }
    }
}

/// The contract consumed from an LED peripheral.
pub trait OutputSink: Send {
    /// Stage one pixel. `index` is the wire index.
    fn set_pixel(&mut self, index: usize, r: u8, g: u8, b: u8);

    /// Push the staged frame out.
    fn refresh(&mut self) -> Result<()>;

    /// Turn the LEDs off and give the peripheral back.
    fn release(&mut self);
}

/// Declarative choice of sink, used by configuration files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputConfig {
    /// Keep frames in memory (headless runs).
    #[default]
    Memory,
    /// Drop frames.
    Null,
    /// WS2812 over a SPI character device.
    Spi {
        #[schema(value_type = String)]
        device: PathBuf,
    },
    /// HUB75 panel driven through rpi-led-matrix.
    Panel,
}

impl OutputConfig {
    /// Open the configured sink for a device.
    pub fn open(&self, init: SinkInit) -> Result<Box<dyn OutputSink>> {
        match self {
            Self::Memory => Ok(Box::new(MemorySink::new(init).0)),
            Self::Null => Ok(Box::new(NullSink)),
            Self::Spi { device } => {
                let file = OpenOptions::new().write(true).open(device)?;
                tracing::info!(
                    "SPI sink on {} ({:?} path, {} LEDs)",
                    device.display(),
                    init.path,
                    init.geometry.led_count()
                );
                Ok(Box::new(SpiSink::new(file, init)))
            }
            #[cfg(feature = "hardware")]
            Self::Panel => Ok(Box::new(panel::PanelSink::open(init)?)),
            #[cfg(not(feature = "hardware"))]
            Self::Panel => Err(LedError::Unsupported(
                "panel output needs the 'hardware' feature".to_string(),
            )),
        }
    }
}

fn stage_grb(buf: &mut [u8], index: usize, r: u8, g: u8, b: u8) {
    let offset = index * 3;
    if let Some(px) = buf.get_mut(offset..offset + 3) {
        px[0] = g;
        px[1] = r;
        px[2] = b;
    }
}

// ── Memory sink ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Shipped {
    grb: Vec<u8>,
    refreshes: u64,
    released: bool,
}

/// Keeps the last shipped frame where a [`SinkTap`] can read it.
pub struct MemorySink {
    staging: Vec<u8>,
    shipped: Arc<Mutex<Shipped>>,
}

/// Read side of a [`MemorySink`].
#[derive(Clone)]
pub struct SinkTap {
    shipped: Arc<Mutex<Shipped>>,
}

impl MemorySink {
    pub fn new(init: SinkInit) -> (Self, SinkTap) {
        let len = init.geometry.led_count() * 3;
        let shipped = Arc::new(Mutex::new(Shipped {
            grb: vec![0; len],
            ..Default::default()
        }));
        let sink = Self {
            staging: vec![0; len],
            shipped: shipped.clone(),
        };
        (sink, SinkTap { shipped })
    }
}

impl OutputSink for MemorySink {
    fn set_pixel(&mut self, index: usize, r: u8, g: u8, b: u8) {
        stage_grb(&mut self.staging, index, r, g, b);
    }

    fn refresh(&mut self) -> Result<()> {
        let mut shipped = self.shipped.lock().unwrap_or_else(|e| e.into_inner());
        shipped.grb.copy_from_slice(&self.staging);
        shipped.refreshes += 1;
        Ok(())
    }

    fn release(&mut self) {
        let mut shipped = self.shipped.lock().unwrap_or_else(|e| e.into_inner());
        shipped.grb.fill(0);
        shipped.released = true;
    }
}

impl SinkTap {
    /// The last shipped frame, GRB bytes.
    pub fn grb(&self) -> Vec<u8> {
        self.lock().grb.clone()
    }

    /// GRB triplet of one LED.
    pub fn pixel(&self, index: usize) -> [u8; 3] {
        let shipped = self.lock();
        let o = index * 3;
        [shipped.grb[o], shipped.grb[o + 1], shipped.grb[o + 2]]
    }

    pub fn refreshes(&self) -> u64 {
        self.lock().refreshes
    }

    pub fn released(&self) -> bool {
        self.lock().released
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shipped> {
        self.shipped.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Null sink ────────────────────────────────────────────────────────

pub struct NullSink;

impl OutputSink for NullSink {
    fn set_pixel(&mut self, _index: usize, _r: u8, _g: u8, _b: u8) {}

    fn refresh(&mut self) -> Result<()> {
        Ok(())
    }

    fn release(&mut self) {}
}

// ── SPI sink ─────────────────────────────────────────────────────────

/// Latch gap appended after every frame.
pub const RESET_LEN: usize = 140;

/// Each pair of data bits becomes one SPI byte at ~3.2 MHz.
const PATTERNS: [u8; 4] = [0b1000_1000, 0b1000_1110, 0b1110_1000, 0b1110_1110];

/// Encode GRB bytes into the WS2812 SPI bit stream (4 SPI bytes per byte).
pub fn encode_ws2812(grb: &[u8], out: &mut Vec<u8>) {
    out.clear();
    for &byte in grb {
        let mut b = byte;
        for _ in 0..4 {
            out.push(PATTERNS[((b & 0b1100_0000) >> 6) as usize]);
            b <<= 2;
        }
    }
    out.extend_from_slice(&[0u8; RESET_LEN]);
}

/// WS2812 strip behind any `Write` (usually `/dev/spidevX.Y`).
pub struct SpiSink<W: Write + Send> {
    writer: W,
    staging: Vec<u8>,
    encoded: Vec<u8>,
}

impl<W: Write + Send> SpiSink<W> {
    pub fn new(writer: W, init: SinkInit) -> Self {
        let len = init.geometry.led_count() * 3;
        Self {
            writer,
            staging: vec![0; len],
            encoded: Vec::with_capacity(len * 4 + RESET_LEN),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> OutputSink for SpiSink<W> {
    fn set_pixel(&mut self, index: usize, r: u8, g: u8, b: u8) {
        stage_grb(&mut self.staging, index, r, g, b);
    }

    fn refresh(&mut self) -> Result<()> {
        encode_ws2812(&self.staging, &mut self.encoded);
        self.writer
            .write_all(&self.encoded)
            .and_then(|()| self.writer.flush())
            .map_err(|e| LedError::Hardware(format!("SPI write failed: {e}")))
    }

    fn release(&mut self) {
        self.staging.fill(0);
        if let Err(e) = self.refresh() {
            tracing::warn!("Failed to blank strip on release: {}", e);
        }
    }
}

// ── Panel sink ───────────────────────────────────────────────────────

#[cfg(feature = "hardware")]
mod panel {
    use super::{OutputSink, SinkInit};
    use crate::error::{LedError, Result};
    use crate::geometry::Geometry;
    use rpi_led_matrix::{LedColor, LedMatrix, LedMatrixOptions, LedRuntimeOptions};
    use std::sync::mpsc::{self, Receiver, SyncSender};
    use std::thread;

    /// Create a matrix configured for an Adafruit bonnet.
    fn create_matrix(geometry: Geometry) -> std::result::Result<LedMatrix, String> {
        let mut options = LedMatrixOptions::new();
        options.set_rows(geometry.height as u32);
        options.set_cols(geometry.width as u32);
        options.set_hardware_mapping("adafruit-hat");
        options.set_pwm_bits(8).map_err(|e| e.to_string())?;
        options.set_pwm_lsb_nanoseconds(130);

        let mut rt_options = LedRuntimeOptions::new();
        rt_options.set_gpio_slowdown(2);

        LedMatrix::new(Some(options), Some(rt_options)).map_err(|e| e.to_string())
    }

    /// HUB75 panel. The C library is not thread-safe, so the matrix lives
    /// on its own thread and frames travel over a channel.
    pub struct PanelSink {
        staging: Vec<u8>,
        spare: Option<Vec<u8>>,
        frames: SyncSender<Vec<u8>>,
        recycled: Receiver<Vec<u8>>,
    }

    impl PanelSink {
        pub fn open(init: SinkInit) -> Result<Self> {
            let geometry = init.geometry;
            let len = geometry.led_count() * 3;
            let (frames_tx, frames_rx) = mpsc::sync_channel::<Vec<u8>>(1);
            let (recycle_tx, recycle_rx) = mpsc::channel();
            let (ready_tx, ready_rx) = mpsc::channel();

            thread::Builder::new()
                .name("led-panel".to_string())
                .spawn(move || {
                    let matrix = match create_matrix(geometry) {
                        Ok(m) => {
                            let _ = ready_tx.send(Ok(()));
                            m
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let mut canvas = matrix.offscreen_canvas();
                    for grb in frames_rx {
                        for (i, px) in grb.chunks_exact(3).enumerate() {
                            if let Ok((x, y)) = geometry.index_to_xy(i) {
                                let color = LedColor {
                                    red: px[1],
                                    green: px[0],
                                    blue: px[2],
                                };
                                canvas.set(x, y, &color);
                            }
                        }
                        canvas = matrix.swap(canvas);
                        let _ = recycle_tx.send(grb);
                    }
                    tracing::info!("Panel thread: channel closed, shutting down.");
                })
                .map_err(|e| LedError::Hardware(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(LedError::Hardware(format!("matrix init failed: {e}"))),
                Err(_) => return Err(LedError::Hardware("panel thread died".to_string())),
            }

            Ok(Self {
                staging: vec![0; len],
                spare: Some(vec![0; len]),
                frames: frames_tx,
                recycled: recycle_rx,
            })
        }
    }

    impl OutputSink for PanelSink {
        fn set_pixel(&mut self, index: usize, r: u8, g: u8, b: u8) {
            super::stage_grb(&mut self.staging, index, r, g, b);
        }

        fn refresh(&mut self) -> Result<()> {
            if self.spare.is_none() {
                self.spare = self.recycled.try_recv().ok();
            }
            let Some(mut out) = self.spare.take() else {
                // Panel still busy with the previous frame: skip this one.
                return Ok(());
            };
            out.copy_from_slice(&self.staging);
            self.frames
                .try_send(out)
                .map_err(|e| LedError::Hardware(format!("panel thread unavailable: {e}")))
        }

        fn release(&mut self) {
            self.staging.fill(0);
            let _ = self.refresh();
        }
    }
}

#[cfg(feature = "hardware")]
pub use panel::PanelSink;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(256, SinkPath::LowLatency)]
    #[case(257, SinkPath::Bulk)]
    #[case(16, SinkPath::LowLatency)]
    #[case(1024, SinkPath::Bulk)]
    fn path_follows_led_count(#[case] n: usize, #[case] expected: SinkPath) {
        assert_eq!(SinkPath::for_led_count(n), expected);
    }

    #[test]
    fn memory_sink_ships_grb_on_refresh() {
        let (mut sink, tap) = MemorySink::new(SinkInit::new(Geometry::linear(2)));
        sink.set_pixel(1, 10, 20, 30);
        assert_eq!(tap.grb(), vec![0; 6]);
        sink.refresh().unwrap();
        assert_eq!(tap.pixel(1), [20, 10, 30]);
        assert_eq!(tap.refreshes(), 1);
    }

    #[test]
    fn memory_sink_ignores_out_of_range_pixels() {
        let (mut sink, tap) = MemorySink::new(SinkInit::new(Geometry::linear(1)));
        sink.set_pixel(5, 1, 2, 3);
        sink.refresh().unwrap();
        assert_eq!(tap.grb(), vec![0, 0, 0]);
    }

    #[test]
    fn ws2812_encoding_is_four_bytes_per_byte() {
        let mut out = Vec::new();
        encode_ws2812(&[0b1110_0100], &mut out);
        assert_eq!(out.len(), 4 + RESET_LEN);
        assert_eq!(
            &out[..4],
            &[0b1110_1110, 0b1110_1000, 0b1000_1110, 0b1000_1000]
        );
        assert!(out[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn spi_sink_writes_frame_to_writer() {
        let mut sink = SpiSink::new(Vec::new(), SinkInit::new(Geometry::linear(1)));
        sink.set_pixel(0, 0xFF, 0, 0);
        sink.refresh().unwrap();
        let written = sink.into_inner();
        assert_eq!(written.len(), 12 + RESET_LEN);
        // G byte first: all zero bits
        assert_eq!(&written[..4], &[0b1000_1000; 4]);
        // R byte: all one bits
        assert_eq!(&written[4..8], &[0b1110_1110; 4]);
    }

    #[test]
    fn memory_config_opens() {
        let sink = OutputConfig::Memory.open(SinkInit::new(Geometry::linear(4)));
        assert!(sink.is_ok());
    }

    #[test]
    fn spi_config_missing_device_is_not_found() {
        let cfg = OutputConfig::Spi {
            device: PathBuf::from("/nonexistent/spidev9.9"),
        };
        let err = cfg.open(SinkInit::new(Geometry::linear(4))).err().unwrap();
        assert!(matches!(err, LedError::NotFound(_)), "{err:?}");
    }
}
