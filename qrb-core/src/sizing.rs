//! QR symbol and page sizing.
//!
//! Turns the printing knobs (QR version, error-correction level, scale, page
//! size, DPI) into the numbers the core needs: bytes per symbol and symbols
//! per page.

use crate::error::{QrbError, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCorrection {
    L,
    M,
    Q,
    H,
}

impl ErrorCorrection {
    fn column(self) -> usize {
        match self {
            ErrorCorrection::L => 0,
            ErrorCorrection::M => 1,
            ErrorCorrection::Q => 2,
            ErrorCorrection::H => 3,
        }
    }
}

/// Byte-mode capacity per version (1..=40) and level L, M, Q, H.
const BYTE_CAPACITY: [[u16; 4]; 40] = [
    [17, 14, 11, 7],
    [32, 26, 20, 14],
    [53, 42, 32, 24],
    [78, 62, 46, 34],
    [106, 84, 60, 44],
    [134, 106, 74, 58],
    [154, 122, 86, 64],
    [192, 152, 108, 84],
    [230, 180, 130, 98],
    [271, 213, 151, 119],
    [321, 251, 177, 137],
    [367, 287, 203, 155],
    [425, 331, 241, 177],
    [458, 362, 258, 194],
    [520, 412, 292, 220],
    [586, 450, 322, 250],
    [644, 504, 364, 280],
    [718, 560, 394, 310],
    [792, 624, 442, 338],
    [858, 666, 482, 382],
    [929, 711, 509, 403],
    [1003, 779, 565, 439],
    [1091, 857, 611, 461],
    [1171, 911, 661, 511],
    [1273, 997, 715, 535],
    [1367, 1059, 751, 593],
    [1465, 1125, 805, 625],
    [1528, 1190, 868, 658],
    [1628, 1264, 908, 698],
    [1732, 1370, 982, 742],
    [1840, 1452, 1030, 790],
    [1952, 1538, 1112, 842],
    [2068, 1628, 1168, 898],
    [2188, 1722, 1228, 958],
    [2303, 1809, 1283, 983],
    [2431, 1911, 1351, 1051],
    [2563, 1989, 1423, 1093],
    [2699, 2099, 1499, 1139],
    [2809, 2213, 1579, 1219],
    [2953, 2331, 1663, 1273],
];

/// Largest accepted pixels-per-module.
pub const MAX_SCALE: u32 = 1000;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymbolSpec {
    pub version: u8,
    pub ecl: ErrorCorrection,
    /// Pixels per module.
    pub scale: u32,
}

impl Default for SymbolSpec {
    fn default() -> Self {
        Self { version: 10, ecl: ErrorCorrection::M, scale: 5 }
    }
}

impl SymbolSpec {
    pub fn validate(&self) -> Result<()> {
        if !(1..=40).contains(&self.version) {
            return Err(QrbError::InvalidConfig(format!(
                "QR version must be 1..=40, got {}",
                self.version
            )));
        }
        if !(1..=MAX_SCALE).contains(&self.scale) {
            return Err(QrbError::InvalidConfig(format!(
                "scale must be 1..={MAX_SCALE}, got {}",
                self.scale
            )));
        }
        Ok(())
    }

    /// Bytes one symbol carries in byte mode.
    pub fn byte_capacity(&self) -> usize {
        let row = (self.version.clamp(1, 40) - 1) as usize;
        BYTE_CAPACITY[row][self.ecl.column()] as usize
    }

    /// Modules per side.
    pub fn modules(&self) -> u32 {
        17 + 4 * self.version as u32
    }

    pub fn pixel_size(&self) -> u32 {
        self.modules().saturating_mul(self.scale)
    }

    /// Quiet zone kept around every symbol.
    pub fn padding(&self) -> u32 {
        self.scale.saturating_mul(4)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct PageGeometry {
    pub width_points: f64,
    pub height_points: f64,
    pub dpi: u32,
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self { width_points: 500.0, height_points: 600.0, dpi: 300 }
    }
}

impl PageGeometry {
    pub fn validate(&self) -> Result<()> {
        let finite = self.width_points.is_finite() && self.height_points.is_finite();
        if !finite || self.width_points <= 0.0 || self.height_points <= 0.0 || self.dpi == 0 {
            return Err(QrbError::InvalidConfig(format!(
                "page must have positive size and DPI, got {}x{} pt at {} dpi",
                self.width_points, self.height_points, self.dpi
            )));
        }
        Ok(())
    }

    /// Page size in pixels, `floor(points / 72 * dpi)`.
    pub fn pixel_size(&self) -> (u32, u32) {
        let px = |pt: f64| (pt / 72.0 * self.dpi as f64).floor() as u32;
        (px(self.width_points), px(self.height_points))
    }
}

/// Largest `n` with `n * unit + (n + 1) * padding <= total`.
pub fn max_units_with_padding(total: u32, unit: u32, padding: u32) -> u32 {
    let total = total as u64;
    let (unit, padding) = (unit as u64, padding as u64);
    if total < padding || unit + padding == 0 {
        return 0;
    }
    ((total - padding) / (unit + padding)) as u32
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageGrid {
    pub columns: u32,
    pub rows: u32,
}

impl PageGrid {
    pub fn per_page(&self) -> u32 {
        self.columns * self.rows
    }
}

pub fn page_grid(symbol: &SymbolSpec, page: &PageGeometry) -> PageGrid {
    let (w, h) = page.pixel_size();
    let size = symbol.pixel_size();
    let padding = symbol.padding();
    PageGrid {
        columns: max_units_with_padding(w, size, padding),
        rows: max_units_with_padding(h, size, padding),
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DensitySample {
    pub version: u8,
    pub scale: u32,
    pub symbols_per_page: u32,
    pub bytes_per_symbol: usize,
    pub bytes_per_page: usize,
}

/// Density of every version/scale combination that fits at least
/// `min_symbols` symbols on the page, densest first.
pub fn density_table(
    page: &PageGeometry,
    ecl: ErrorCorrection,
    versions: &[u8],
    scales: &[u32],
    min_symbols: u32,
) -> Vec<DensitySample> {
    let mut out = Vec::new();
    for &version in versions {
        for &scale in scales {
            let symbol = SymbolSpec { version, ecl, scale };
            if symbol.validate().is_err() {
                continue;
            }
            let per_page = page_grid(&symbol, page).per_page();
            if per_page < min_symbols.max(1) {
                continue;
            }
            let per_symbol = symbol.byte_capacity().saturating_sub(crate::CHUNK_HEADER_LEN);
            out.push(DensitySample {
                version,
                scale,
                symbols_per_page: per_page,
                bytes_per_symbol: per_symbol,
                bytes_per_page: per_symbol * per_page as usize,
            });
        }
    }
    out.sort_by(|a, b| {
        b.bytes_per_page.cmp(&a.bytes_per_page).then(a.version.cmp(&b.version)).then(a.scale.cmp(&b.scale))
    });
    out
}
