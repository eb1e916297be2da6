//! Monotone cubic Hermite interpolation.
//!
//! Knot slopes follow Fritsch–Carlson, so a spline through monotone data is
//! itself monotone and can be inverted by swapping the axes. Outside the knot
//! range the spline continues linearly with the end slopes.

use crate::{Error, Result};

/// Piecewise cubic Hermite spline over strictly increasing knots.
#[derive(Debug, Clone, PartialEq)]
pub struct MonotoneSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    m: Vec<f64>,
}

impl MonotoneSpline {
    /// Builds a spline through `(x[i], y[i])`.
    ///
    /// # Errors
    /// Returns [`Error::DataQuality`] if fewer than two knots are given, the
    /// lengths differ, any value is non-finite, or `x` is not strictly
    /// increasing.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        let k = x.len();
        if k < 2 {
            return Err(Error::DataQuality(format!(
                "spline needs at least 2 knots, got {k}"
            )));
        }
        if y.len() != k {
            return Err(Error::DataQuality(format!(
                "spline knot length mismatch: {k} x values, {} y values",
                y.len()
            )));
        }
        if let Some(i) = (0..k).find(|&i| !x[i].is_finite() || !y[i].is_finite()) {
            return Err(Error::DataQuality(format!(
                "spline knot {i} is not finite (x={}, y={})",
                x[i], y[i]
            )));
        }
        if let Some(i) = (1..k).find(|&i| x[i] <= x[i - 1]) {
            return Err(Error::DataQuality(format!(
                "spline knots must be strictly increasing: x[{}]={} >= x[{i}]={}",
                i - 1,
                x[i - 1],
                x[i]
            )));
        }

        let m = fritsch_carlson_slopes(&x, &y);
        Ok(Self { x, y, m })
    }

    /// Builds a spline from unordered points, sorting them by `x`.
    ///
    /// # Errors
    /// Same as [`MonotoneSpline::new`]; duplicate `x` values are rejected.
    pub fn from_points(points: &[(f64, f64)]) -> Result<Self> {
        let mut sorted = points.to_vec();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (x, y) = sorted.into_iter().unzip();
        Self::new(x, y)
    }

    /// Knot abscissae.
    #[must_use]
    pub fn knots_x(&self) -> &[f64] {
        &self.x
    }

    /// Knot ordinates.
    #[must_use]
    pub fn knots_y(&self) -> &[f64] {
        &self.y
    }

    /// Evaluates the spline at `x`.
    #[must_use]
    pub fn eval(&self, x: f64) -> f64 {
        let k = self.x.len();
        if x <= self.x[0] {
            return self.y[0] + self.m[0] * (x - self.x[0]);
        }
        if x >= self.x[k - 1] {
            return self.y[k - 1] + self.m[k - 1] * (x - self.x[k - 1]);
        }

        // First knot strictly greater than x, minus one.
        let i = self.x.partition_point(|&v| v <= x).saturating_sub(1).min(k - 2);

        let h = self.x[i + 1] - self.x[i];
        let t = (x - self.x[i]) / h;

        let h00 = (1.0 + 2.0 * t) * (1.0 - t) * (1.0 - t);
        let h10 = t * (1.0 - t) * (1.0 - t);
        let h01 = t * t * (3.0 - 2.0 * t);
        let h11 = t * t * (t - 1.0);

        h00 * self.y[i] + h10 * h * self.m[i] + h01 * self.y[i + 1] + h11 * h * self.m[i + 1]
    }

    /// Builds the inverse spline (`y -> x`) through the same knots.
    ///
    /// # Errors
    /// Returns [`Error::DataQuality`] unless `y` is strictly monotone.
    pub fn inverse(&self) -> Result<Self> {
        let increasing = self.y.windows(2).all(|w| w[1] > w[0]);
        let decreasing = self.y.windows(2).all(|w| w[1] < w[0]);
        if increasing {
            Self::new(self.y.clone(), self.x.clone())
        } else if decreasing {
            Self::new(
                self.y.iter().rev().copied().collect(),
                self.x.iter().rev().copied().collect(),
            )
        } else {
            Err(Error::DataQuality(
                "spline is not strictly monotone and cannot be inverted".into(),
            ))
        }
    }
}

fn fritsch_carlson_slopes(x: &[f64], y: &[f64]) -> Vec<f64> {
    let k = x.len();

    let delta: Vec<f64> = (0..k - 1)
        .map(|i| (y[i + 1] - y[i]) / (x[i + 1] - x[i]))
        .collect();

    let mut m = vec![0.0; k];
    m[0] = delta[0];
    for i in 1..k - 1 {
        m[i] = if delta[i - 1].signum() == delta[i].signum() {
            0.5 * (delta[i - 1] + delta[i])
        } else {
            0.0
        };
    }
    m[k - 1] = delta[k - 2];

    for i in 0..k - 1 {
        if delta[i].abs() < 1e-30 {
            m[i] = 0.0;
            m[i + 1] = 0.0;
        } else {
            let alpha = m[i] / delta[i];
            let beta = m[i + 1] / delta[i];
            let phi = alpha * alpha + beta * beta;
            if phi > 9.0 {
                let tau = 3.0 / phi.sqrt();
                m[i] = tau * alpha * delta[i];
                m[i + 1] = tau * beta * delta[i];
            }
        }
    }

    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_linear_data_is_reproduced() {
        let x: Vec<f64> = vec![0.0, 1.0, 3.0, 4.0, 10.0];
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let s = MonotoneSpline::new(x, y).unwrap();
        for v in [0.0, 0.3, 2.2, 3.9, 7.5, 10.0] {
            assert_abs_diff_eq!(s.eval(v), 2.0 * v + 1.0, epsilon = 1e-12);
        }
        // Linear continuation outside the knots.
        assert_abs_diff_eq!(s.eval(-1.0), -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.eval(12.0), 25.0, epsilon = 1e-12);
    }

    #[test]
    fn test_passes_through_knots_and_stays_monotone() {
        let x = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let y = vec![0.0, 0.1, 2.0, 2.1, 5.0];
        let s = MonotoneSpline::new(x.clone(), y.clone()).unwrap();
        for (xi, yi) in x.iter().zip(&y) {
            assert_abs_diff_eq!(s.eval(*xi), *yi, epsilon = 1e-12);
        }
        let mut prev = s.eval(0.0);
        for i in 1..=400 {
            let v = s.eval(f64::from(i) * 0.01);
            assert!(v >= prev - 1e-12);
            prev = v;
        }
    }

    #[test]
    fn test_inverse_of_decreasing_curve() {
        let s = MonotoneSpline::new(vec![1.0, 2.0, 3.0, 4.0], vec![0.3, 0.1, -0.1, -0.4]).unwrap();
        let inv = s.inverse().unwrap();
        assert_abs_diff_eq!(inv.eval(0.1), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(inv.eval(-0.4), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_bad_knots() {
        assert!(MonotoneSpline::new(vec![1.0], vec![1.0]).is_err());
        assert!(MonotoneSpline::new(vec![1.0, 1.0], vec![1.0, 2.0]).is_err());
        assert!(MonotoneSpline::new(vec![0.0, f64::NAN], vec![1.0, 2.0]).is_err());
        let flat = MonotoneSpline::new(vec![0.0, 1.0, 2.0], vec![1.0, 1.0, 2.0]).unwrap();
        assert!(flat.inverse().is_err());
    }

    #[test]
    fn test_from_points_sorts() {
        let s = MonotoneSpline::from_points(&[(2.0, 4.0), (0.0, 0.0), (1.0, 2.0)]).unwrap();
        assert_eq!(s.knots_x(), &[0.0, 1.0, 2.0]);
        assert_abs_diff_eq!(s.eval(1.5), 3.0, epsilon = 1e-12);
    }
}
