//! Process-wide lookup tables and dB conversions.
//!
//! The tables are initialised once on first use and read-only afterwards,
//! so any number of engines on any number of threads can share them.

use once_cell::sync::Lazy;

use std::f64::consts::TAU;

/// Number of entries in the trigonometric tables.
const TRIG_TABLE_SIZE: usize = 16384;
/// Number of entries in the dB-to-linear table.
const DB_TABLE_SIZE: usize = 8192;
/// Lower bound of the dB-to-linear table. Below this, amplitudes are
/// indistinguishable from zero in 32-bit audio.
const DB_TABLE_MIN: f64 = -300.0;

/// Converts an amplitude in dB to linear scale.
#[inline]
pub fn db2lin(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Converts a linear amplitude to dB.
#[inline]
pub fn lin2db(lin: f64) -> f64 {
    20.0 * lin.log10()
}

/// Sampled function over a fixed range with a precomputed index scale.
#[derive(Debug)]
pub struct LookupTable {
    xmin: f64,
    x2i: f64,
    values: Vec<f32>,
}

impl LookupTable {
    fn from_fn(xmin: f64, xmax: f64, size: usize, f: impl Fn(f64) -> f64) -> Self {
        assert!(size >= 2);
        let step = (xmax - xmin) / (size - 1) as f64;
        let values = (0..size)
            .map(|n| f(xmin + n as f64 * step) as f32)
            .collect();
        Self {
            xmin,
            x2i: (size - 1) as f64 / (xmax - xmin),
            values,
        }
    }

    /// Linear interpolation with clamped boundaries.
    #[inline]
    pub fn interp_clamped(&self, x: f64) -> f32 {
        let nf = (x - self.xmin) * self.x2i;
        if nf <= 0.0 {
            return self.values[0];
        }
        let n = nf as usize;
        if n + 1 >= self.values.len() {
            return self.values[self.values.len() - 1];
        }
        let g = (nf - n as f64) as f32;
        (1.0 - g) * self.values[n] + g * self.values[n + 1]
    }

    /// Nearest-entry lookup; the caller guarantees `x` is in range.
    #[inline]
    fn nearest(&self, x: f64) -> f32 {
        let n = ((x - self.xmin) * self.x2i + 0.5) as usize;
        self.values[n.min(self.values.len() - 1)]
    }
}

/// Cosine over `[0, 2π]`.
static COS_LUT: Lazy<LookupTable> =
    Lazy::new(|| LookupTable::from_fn(0.0, TAU, TRIG_TABLE_SIZE, f64::cos));

/// Sine over `[0, 2π]`.
static SIN_LUT: Lazy<LookupTable> =
    Lazy::new(|| LookupTable::from_fn(0.0, TAU, TRIG_TABLE_SIZE, f64::sin));

/// dB-to-linear over `[-300, 0]`.
static DB2LIN_LUT: Lazy<LookupTable> =
    Lazy::new(|| LookupTable::from_fn(DB_TABLE_MIN, 0.0, DB_TABLE_SIZE, db2lin));

/// Table-backed cosine for arbitrary arguments.
#[inline]
pub fn cos_lut(x: f64) -> f32 {
    COS_LUT.nearest(x.abs().rem_euclid(TAU))
}

/// Table-backed sine for arbitrary arguments.
#[inline]
pub fn sin_lut(x: f64) -> f32 {
    let wrapped = x.rem_euclid(TAU);
    SIN_LUT.nearest(wrapped)
}

/// Table-backed dB-to-linear conversion, clamped to `[-300, 0]` dB.
#[inline]
pub fn db2lin_lut(db: f64) -> f32 {
    DB2LIN_LUT.interp_clamped(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_roundtrip() {
        for &db in &[-120.0, -60.0, -6.0, 0.0] {
            let lin = db2lin(db);
            assert!((lin2db(lin) - db).abs() < 1e-9);
        }
        assert!((db2lin(-120.0) - 1e-6).abs() < 1e-12);
    }

    #[test]
    fn trig_tables_track_ground_truth() {
        let mut x = -10.0;
        while x < 10.0 {
            assert!((f64::from(cos_lut(x)) - x.cos()).abs() < 1e-3, "x = {}", x);
            assert!((f64::from(sin_lut(x)) - x.sin()).abs() < 1e-3, "x = {}", x);
            x += 0.0137;
        }
    }

    #[test]
    fn db_table_tracks_ground_truth() {
        let mut db = -299.0;
        while db < 0.0 {
            let exact = db2lin(db);
            let approx = f64::from(db2lin_lut(db));
            assert!((approx - exact).abs() < 1e-4, "db = {}", db);
            db += 0.73;
        }
        // Clamped outside the table range
        assert_eq!(db2lin_lut(10.0), 1.0);
        assert!(db2lin_lut(-400.0) < 1e-12);
    }

    #[test]
    fn tables_shared_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|t| {
                std::thread::spawn(move || {
                    let x = 0.1 * t as f64;
                    (cos_lut(x), sin_lut(x), db2lin_lut(-20.0 * t as f64))
                })
            })
            .collect();
        for h in handles {
            let (c, s, _) = h.join().expect("thread panicked");
            assert!(c.is_finite() && s.is_finite());
        }
    }
}
