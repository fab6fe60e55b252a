//! [`LimitTable`] – speed-indexed piecewise-linear limit lookup.
//!
//! Every vehicle limit that depends on speed (steering angle, lateral
//! acceleration, …) is configured as a small table of
//! `(reference_speed, limit)` breakpoints.  [`LimitTable::at`] linearly
//! interpolates between neighbouring breakpoints and clamps to the first or
//! last value outside the table; it never extrapolates.
//!
//! # Example
//!
//! ```
//! use cmdgate_kernel::LimitTable;
//!
//! let steer_rate = LimitTable::new(vec![(0.0, 0.5), (10.0, 0.2)]).unwrap();
//! assert!((steer_rate.at(5.0) - 0.35).abs() < 1e-9);
//! assert_eq!(steer_rate.at(30.0), 0.2);
//! ```

use cmdgate_types::GateError;

/// Piecewise-linear limit as a function of the absolute vehicle speed.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitTable {
    speeds: Vec<f64>,
    limits: Vec<f64>,
}

impl LimitTable {
    /// Build a table from `(reference_speed, limit)` pairs.
    ///
    /// # Errors
    ///
    /// [`GateError::Config`] when the table is empty, contains non-finite
    /// values or negative limits, or the reference speeds are not strictly
    /// increasing.
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self, GateError> {
        let (speeds, limits) = points.into_iter().unzip();
        Self::validated(speeds, limits)
    }

    /// Build a table from a shared breakpoint list and one value per
    /// breakpoint, the layout used by the configuration file.
    pub fn from_columns(reference_speeds: &[f64], limits: &[f64]) -> Result<Self, GateError> {
        if reference_speeds.len() != limits.len() {
            return Err(GateError::Config(format!(
                "limit table has {} values for {} reference speed points",
                limits.len(),
                reference_speeds.len()
            )));
        }
        Self::validated(reference_speeds.to_vec(), limits.to_vec())
    }

    /// A table that yields `limit` at every speed.
    pub fn constant(limit: f64) -> Result<Self, GateError> {
        Self::validated(vec![0.0], vec![limit])
    }

    fn validated(speeds: Vec<f64>, limits: Vec<f64>) -> Result<Self, GateError> {
        if speeds.is_empty() {
            return Err(GateError::Config("limit table is empty".to_string()));
        }
        if let Some(v) = speeds.iter().chain(&limits).find(|v| !v.is_finite()) {
            return Err(GateError::Config(format!("limit table contains non-finite value {v}")));
        }
        if let Some(v) = limits.iter().find(|v| **v < 0.0) {
            return Err(GateError::Config(format!("limit table contains negative limit {v}")));
        }
        if let Some(pair) = speeds.windows(2).find(|w| w[0] >= w[1]) {
            return Err(GateError::Config(format!(
                "reference speed points must be strictly increasing ({} >= {})",
                pair[0], pair[1]
            )));
        }
        Ok(Self { speeds, limits })
    }

    /// Limit at `speed`.  The sign of `speed` is ignored.
    pub fn at(&self, speed: f64) -> f64 {
        let v = speed.abs();
        let last = self.speeds.len() - 1;
        if v <= self.speeds[0] {
            return self.limits[0];
        }
        if v >= self.speeds[last] {
            return self.limits[last];
        }
        // speeds[0] < v < speeds[last], so 1 <= upper <= last.
        let upper = self.speeds.partition_point(|s| *s <= v);
        let lower = upper - 1;
        let ratio = (v - self.speeds[lower]) / (self.speeds[upper] - self.speeds[lower]);
        self.limits[lower] + ratio * (self.limits[upper] - self.limits[lower])
    }
}
