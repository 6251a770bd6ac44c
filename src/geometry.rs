//! Coordinate mapping between 2-D positions and the wire index of an LED.
//!
//! A matrix is rarely wired row by row. The `scan` describes the physical
//! wiring order, the `origin` which corner `(0, 0)` refers to. Mapping
//! reflects by origin first, then applies the scan.

use crate::error::{LedError, Result};
use serde::{Deserialize, Serialize};

/// Physical arrangement of a device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    #[default]
    Strip,
    Ring,
    Matrix,
}

impl Layout {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strip => "strip",
            Self::Ring => "ring",
            Self::Matrix => "matrix",
        }
    }
}

/// Wiring order from LED 0 onwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Scan {
    #[default]
    Rows,
    Columns,
    ZigzagRows,
    ZigzagColumns,
}

/// The corner that coordinate `(0, 0)` refers to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Origin {
    fn mirrors_x(self) -> bool {
        matches!(self, Self::TopRight | Self::BottomRight)
    }

    fn mirrors_y(self) -> bool {
        matches!(self, Self::BottomLeft | Self::BottomRight)
    }
}

/// Immutable shape of a device surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Geometry {
    pub width: u16,
    pub height: u16,
    #[serde(default)]
    pub scan: Scan,
    #[serde(default)]
    pub origin: Origin,
}

impl Geometry {
    /// A one-row surface of `len` LEDs (strips and rings).
    pub fn linear(len: u16) -> Self {
        Self {
            width: len,
            height: 1,
            scan: Scan::Rows,
            origin: Origin::TopLeft,
        }
    }

    pub fn matrix(width: u16, height: u16, scan: Scan, origin: Origin) -> Self {
        Self {
            width,
            height,
            scan,
            origin,
        }
    }

    pub fn led_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width as i32 && y < self.height as i32
    }

    /// Map `(x, y)` to the wire index.
    ///
    /// Out-of-range coordinates are `InvalidArg`; drawing code treats that
    /// as clipping.
    pub fn xy_to_index(&self, x: i32, y: i32) -> Result<usize> {
        if !self.contains(x, y) {
            return Err(LedError::invalid_arg(format!(
                "({x}, {y}) outside {}x{}",
                self.width, self.height
            )));
        }
        let w = self.width as usize;
        let h = self.height as usize;
        let mut x = x as usize;
        let mut y = y as usize;
        if self.origin.mirrors_x() {
            x = w - 1 - x;
        }
        if self.origin.mirrors_y() {
            y = h - 1 - y;
        }

        Ok(match self.scan {
            Scan::Rows => y * w + x,
            Scan::Columns => x * h + y,
            Scan::ZigzagRows if y % 2 == 0 => y * w + x,
            Scan::ZigzagRows => y * w + (w - 1 - x),
            Scan::ZigzagColumns if x % 2 == 0 => x * h + y,
            Scan::ZigzagColumns => x * h + (h - 1 - y),
        })
    }

    /// Inverse of [`xy_to_index`](Self::xy_to_index).
    pub fn index_to_xy(&self, index: usize) -> Result<(i32, i32)> {
        if index >= self.led_count() {
            return Err(LedError::invalid_arg(format!(
                "index {index} outside {} LEDs",
                self.led_count()
            )));
        }
        let w = self.width as usize;
        let h = self.height as usize;

        let (mut x, mut y) = match self.scan {
            Scan::Rows => (index % w, index / w),
            Scan::Columns => (index / h, index % h),
            Scan::ZigzagRows => {
                let y = index / w;
                let col = index % w;
                (if y % 2 == 0 { col } else { w - 1 - col }, y)
            }
            Scan::ZigzagColumns => {
                let x = index / h;
                let row = index % h;
                (x, if x % 2 == 0 { row } else { h - 1 - row })
            }
        };
        if self.origin.mirrors_x() {
            x = w - 1 - x;
        }
        if self.origin.mirrors_y() {
            y = h - 1 - y;
        }
        Ok((x as i32, y as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::collections::HashSet;

    const SCANS: [Scan; 4] = [
        Scan::Rows,
        Scan::Columns,
        Scan::ZigzagRows,
        Scan::ZigzagColumns,
    ];
    const ORIGINS: [Origin; 4] = [
        Origin::TopLeft,
        Origin::TopRight,
        Origin::BottomLeft,
        Origin::BottomRight,
    ];

    #[rstest]
    #[case(0, 0, 0)]
    #[case(31, 0, 31)]
    #[case(0, 1, 63)]
    #[case(31, 1, 32)]
    #[case(0, 2, 64)]
    #[case(31, 31, 992)]
    fn zigzag_rows_32x32(#[case] x: i32, #[case] y: i32, #[case] expected: usize) {
        let g = Geometry::matrix(32, 32, Scan::ZigzagRows, Origin::TopLeft);
        assert_eq!(g.xy_to_index(x, y).unwrap(), expected);
    }

    #[rstest]
    #[case(Scan::Rows, Origin::TopLeft, 1, 0, 1)]
    #[case(Scan::Rows, Origin::TopRight, 0, 0, 3)]
    #[case(Scan::Rows, Origin::BottomLeft, 0, 0, 8)]
    #[case(Scan::Columns, Origin::TopLeft, 1, 0, 3)]
    #[case(Scan::ZigzagColumns, Origin::TopLeft, 1, 0, 5)]
    #[case(Scan::ZigzagColumns, Origin::BottomRight, 0, 0, 9)]
    fn origin_and_scan_on_4x3(
        #[case] scan: Scan,
        #[case] origin: Origin,
        #[case] x: i32,
        #[case] y: i32,
        #[case] expected: usize,
    ) {
        let g = Geometry::matrix(4, 3, scan, origin);
        assert_eq!(g.xy_to_index(x, y).unwrap(), expected);
    }

    #[rstest]
    #[case(-1, 0)]
    #[case(0, -1)]
    #[case(4, 0)]
    #[case(0, 3)]
    fn out_of_range_is_invalid_arg(#[case] x: i32, #[case] y: i32) {
        let g = Geometry::matrix(4, 3, Scan::Rows, Origin::TopLeft);
        assert!(matches!(g.xy_to_index(x, y), Err(LedError::InvalidArg(_))));
    }

    #[test]
    fn every_combination_is_a_bijection() {
        for (w, h) in [(1, 1), (4, 3), (5, 5), (8, 2), (16, 1)] {
            for scan in SCANS {
                for origin in ORIGINS {
                    let g = Geometry::matrix(w, h, scan, origin);
                    let mut seen = HashSet::new();
                    for y in 0..h as i32 {
                        for x in 0..w as i32 {
                            let i = g.xy_to_index(x, y).unwrap();
                            assert!(i < g.led_count());
                            assert!(seen.insert(i), "{scan:?}/{origin:?} {w}x{h} repeats {i}");
                            assert_eq!(g.index_to_xy(i).unwrap(), (x, y));
                        }
                    }
                    assert_eq!(seen.len(), g.led_count());
                }
            }
        }
    }

    #[test]
    fn linear_geometry_is_one_row() {
        let g = Geometry::linear(16);
        assert_eq!(g.led_count(), 16);
        assert_eq!(g.xy_to_index(5, 0).unwrap(), 5);
        assert!(g.index_to_xy(16).is_err());
    }
}
