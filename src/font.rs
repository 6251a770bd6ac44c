//! Bitmap fonts in the `.fnt` container.
//!
//! Layout (little-endian):
//!
//! | offset | size | field                 |
//! |--------|------|-----------------------|
//! | 0      | 4    | magic `TFNT`          |
//! | 4      | 1    | version               |
//! | 5      | 1    | glyph width           |
//! | 6      | 1    | glyph height          |
//! | 7      | 1    | flags (reserved)      |
//! | 8      | 4    | glyph count           |
//! | 12     | 4    | index offset          |
//!
//! The index holds `glyph count` entries of `(codepoint u16, bitmap offset
//! u32)` sorted by codepoint. Each bitmap is row-major, MSB first,
//! `ceil(w*h/8)` bytes.

use crate::error::{LedError, Result};
use crate::storage::check_name;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

pub const MAGIC: &[u8; 4] = b"TFNT";
pub const HEADER_LEN: usize = 16;
const INDEX_ENTRY_LEN: usize = 6;
pub const MAX_GLYPH_SIZE: u8 = 16;

/// One glyph's bitmap, borrowed from the font.
#[derive(Clone, Copy, Debug)]
pub struct Glyph<'a> {
    pub width: u8,
    pub height: u8,
    bits: &'a [u8],
}

impl Glyph<'_> {
    pub fn is_set(&self, x: u8, y: u8) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let bit = y as usize * self.width as usize + x as usize;
        self.bits
            .get(bit / 8)
            .is_some_and(|byte| byte & (0x80 >> (bit % 8)) != 0)
    }

    /// Rightmost lit column + 1; `None` for a blank glyph.
    pub fn ink_width(&self) -> Option<u8> {
        (0..self.width)
            .rev()
            .find(|&x| (0..self.height).any(|y| self.is_set(x, y)))
            .map(|x| x + 1)
    }
}

#[derive(Debug)]
pub struct Font {
    name: String,
    width: u8,
    height: u8,
    index: Vec<(u16, u32)>,
    data: Vec<u8>,
}

impl Font {
    /// Read and validate a font file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => LedError::not_found(format!("font {}", path.display())),
                _ => e.into(),
            })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let font = Self::parse(name, bytes)?;
        info!(
            "Font {} loaded: {}x{}, {} glyphs",
            font.name,
            font.width,
            font.height,
            font.index.len()
        );
        Ok(font)
    }

    pub fn parse(name: impl Into<String>, data: Vec<u8>) -> Result<Self> {
        let malformed = |what: &str| LedError::invalid_arg(format!("malformed font: {what}"));
        if data.len() < HEADER_LEN || &data[0..4] != MAGIC {
            return Err(malformed("bad magic"));
        }
        let width = data[5];
        let height = data[6];
        if width == 0 || height == 0 || width > MAX_GLYPH_SIZE || height > MAX_GLYPH_SIZE {
            return Err(malformed(&format!("glyph size {width}x{height}")));
        }
        let count = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
        let index_offset = u32::from_le_bytes([data[12], data[13], data[14], data[15]]) as usize;
        let index_end = count
            .checked_mul(INDEX_ENTRY_LEN)
            .and_then(|n| n.checked_add(index_offset))
            .filter(|end| *end <= data.len())
            .ok_or_else(|| malformed("index past end of file"))?;

        let glyph_len = (width as usize * height as usize).div_ceil(8);
        let mut index = Vec::with_capacity(count);
        for entry in data[index_offset..index_end].chunks_exact(INDEX_ENTRY_LEN) {
            let cp = u16::from_le_bytes([entry[0], entry[1]]);
            let offset = u32::from_le_bytes([entry[2], entry[3], entry[4], entry[5]]);
            if offset as usize + glyph_len > data.len() {
                return Err(malformed(&format!("glyph U+{cp:04X} past end of file")));
            }
            index.push((cp, offset));
        }
        if index.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(malformed("index not sorted"));
        }

        Ok(Self {
            name: name.into(),
            width,
            height,
            index,
            data,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    pub fn glyph_count(&self) -> usize {
        self.index.len()
    }

    pub fn glyph(&self, ch: char) -> Option<Glyph<'_>> {
        let cp = u16::try_from(ch as u32).ok()?;
        let pos = self.index.binary_search_by_key(&cp, |(c, _)| *c).ok()?;
        let offset = self.index[pos].1 as usize;
        let len = (self.width as usize * self.height as usize).div_ceil(8);
        Some(Glyph {
            width: self.width,
            height: self.height,
            bits: self.data.get(offset..offset + len)?,
        })
    }

    /// Proportional advance: ink width, or half the cell for blank or
    /// missing glyphs.
    pub fn advance(&self, ch: char) -> u8 {
        self.glyph(ch)
            .and_then(|g| g.ink_width())
            .unwrap_or(self.width / 2)
    }
}

// ── Lookup ───────────────────────────────────────────────────────────

/// `<fonts_dir>/<name>.fnt`; `default` is the CJK font. Names with path
/// separators or dots are `InvalidArg`.
pub fn font_path(fonts_dir: &Path, name: &str) -> Result<PathBuf> {
    let name = if name.is_empty() || name == "default" { "cjk" } else { name };
    check_name("font name", name)?;
    Ok(fonts_dir.join(format!("{name}.fnt")))
}

/// Loaded fonts, keyed by name.
pub struct FontCache {
    dir: PathBuf,
    fonts: Mutex<HashMap<String, Arc<Font>>>,
}

impl FontCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fonts: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, name: &str) -> Result<Arc<Font>> {
        let path = font_path(&self.dir, name)?;
        let key = path.to_string_lossy().into_owned();
        if let Some(font) = self.fonts.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(font.clone());
        }
        let font = Arc::new(Font::load(&path)?);
        self.fonts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, font.clone());
        Ok(font)
    }
}

/// Serialize a font; test fixtures build fonts with this.
#[cfg(test)]
pub(crate) fn encode_font(width: u8, height: u8, glyphs: &[(char, Vec<u8>)]) -> Vec<u8> {
    let glyph_len = (width as usize * height as usize).div_ceil(8);
    let mut sorted: Vec<_> = glyphs.iter().collect();
    sorted.sort_by_key(|(c, _)| *c as u32);

    let index_offset = HEADER_LEN;
    let data_offset = index_offset + sorted.len() * INDEX_ENTRY_LEN;
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, width, height, 0]);
    out.extend_from_slice(&(sorted.len() as u32).to_le_bytes());
    out.extend_from_slice(&(index_offset as u32).to_le_bytes());
    for (i, (c, _)) in sorted.iter().enumerate() {
        out.extend_from_slice(&(*c as u16).to_le_bytes());
        out.extend_from_slice(&((data_offset + i * glyph_len) as u32).to_le_bytes());
    }
    for (_, bits) in &sorted {
        let mut bits = bits.clone();
        bits.resize(glyph_len, 0);
        out.extend_from_slice(&bits);
    }
    out
}
