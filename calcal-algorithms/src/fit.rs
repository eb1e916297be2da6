//! Fit capability used by the calibration stages.
//!
//! Stages only see the [`FitEngine`] trait. [`StandardFitter`] implements it
//! with closed-form least squares for lines and quadratics and binned Poisson
//! likelihood fits (Nelder-Mead via `argmin`) for Gaussian and Landau peaks.
#![allow(clippy::cast_precision_loss, clippy::many_single_char_names)]

use crate::landau::landau_gauss;
use argmin::core::{CostFunction, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use calcal_core::{Error, Histogram, Result};
use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;

/// Result of a Gaussian peak fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussFit {
    /// Fitted mean.
    pub mean: f64,
    /// Fitted standard deviation.
    pub sigma: f64,
    /// Fitted number of entries under the curve.
    pub norm: f64,
}

/// Result of a Landau-convolved-Gaussian peak fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandauFit {
    /// Most probable value of the Landau component.
    pub mpv: f64,
    /// Landau scale parameter.
    pub width: f64,
    /// Gaussian smearing width.
    pub sigma: f64,
    /// Fitted number of entries under the curve.
    pub norm: f64,
}

/// Straight-line fit `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    /// Slope.
    pub slope: f64,
    /// Intercept.
    pub intercept: f64,
    /// Standard error on the slope.
    pub slope_err: f64,
    /// Standard error on the intercept.
    pub intercept_err: f64,
}

impl LineFit {
    /// Evaluates the line at `x`.
    #[must_use]
    pub fn eval(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Quadratic `y = a + b x + c x^2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadratic {
    /// Constant term.
    pub a: f64,
    /// Linear coefficient.
    pub b: f64,
    /// Quadratic coefficient.
    pub c: f64,
}

impl Quadratic {
    /// Evaluates the polynomial at `x`.
    #[must_use]
    pub fn eval(&self, x: f64) -> f64 {
        self.a + (self.b + self.c * x) * x
    }
}

/// A point for a line fit, with an optional error on `y`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPoint {
    /// Abscissa.
    pub x: f64,
    /// Ordinate.
    pub y: f64,
    /// Error on `y`; unweighted points take their error from the residuals.
    pub sigma: Option<f64>,
}

impl FitPoint {
    /// Unweighted point.
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, sigma: None }
    }

    /// Point with an error on `y`.
    #[must_use]
    pub fn with_sigma(x: f64, y: f64, sigma: f64) -> Self {
        Self {
            x,
            y,
            sigma: Some(sigma),
        }
    }
}

/// Numerical fitting capability.
///
/// Every method either returns a finite, physical result or a
/// [`Error::Fit`]; callers decide whether a fallback exists.
pub trait FitEngine {
    /// Engine name.
    fn name(&self) -> &'static str;

    /// Fits a Gaussian to the histogram bins whose centers lie in `window`.
    fn fit_gaussian(&self, hist: &Histogram, window: (f64, f64)) -> Result<GaussFit>;

    /// Fits a straight line.
    fn fit_line(&self, points: &[FitPoint]) -> Result<LineFit>;

    /// Least-squares quadratic through `(x, y)` points.
    fn fit_quadratic(&self, points: &[(f64, f64)]) -> Result<Quadratic>;

    /// Fits a Landau convolved with a Gaussian to the bins in `window`.
    fn fit_landau(&self, hist: &Histogram, window: (f64, f64)) -> Result<LandauFit>;
}

/// Default [`FitEngine`] implementation.
#[derive(Clone, Debug)]
pub struct StandardFitter {
    /// Iteration cap for likelihood minimization.
    pub max_iters: u64,
    /// Simplex spread at which minimization stops.
    pub sd_tolerance: f64,
}

impl Default for StandardFitter {
    fn default() -> Self {
        Self {
            max_iters: 5000,
            sd_tolerance: 1e-6,
        }
    }
}

impl StandardFitter {
    /// Create with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the iteration cap.
    #[must_use]
    pub fn with_max_iters(mut self, max_iters: u64) -> Self {
        self.max_iters = max_iters;
        self
    }

    fn minimize(&self, problem: BinnedNll, start: &[f64], steps: &[f64]) -> Result<Vec<f64>> {
        let mut simplex = vec![start.to_vec()];
        for (i, step) in steps.iter().enumerate() {
            let mut vertex = start.to_vec();
            vertex[i] += step;
            simplex.push(vertex);
        }
        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(self.sd_tolerance)
            .map_err(|e| Error::Fit(e.to_string()))?;
        let res = Executor::new(problem, solver)
            .configure(|state| state.max_iters(self.max_iters))
            .run()
            .map_err(|e| Error::Fit(e.to_string()))?;
        let state = res.state();
        if let Some(TerminationReason::MaxItersReached) = state.get_termination_reason() {
            return Err(Error::Fit(format!(
                "minimizer did not converge in {} iterations",
                self.max_iters
            )));
        }
        if !state.get_best_cost().is_finite() {
            return Err(Error::Fit("likelihood is not finite at the minimum".into()));
        }
        state
            .get_best_param()
            .cloned()
            .ok_or_else(|| Error::Fit("minimizer returned no parameters".into()))
    }
}

/// Binned Poisson negative log-likelihood for a parametric shape.
struct BinnedNll {
    bins: Vec<(f64, f64)>,
    bin_width: f64,
    shape: fn(f64, &[f64]) -> f64,
}

impl BinnedNll {
    fn new(hist: &Histogram, window: (f64, f64), shape: fn(f64, &[f64]) -> f64) -> Result<Self> {
        let bins: Vec<(f64, f64)> = hist.window(window.0, window.1).collect();
        let filled = bins.iter().filter(|(_, n)| *n > 0.0).count();
        if filled < 3 {
            return Err(Error::Fit(format!(
                "only {filled} populated bins in fit window [{:.1}, {:.1}]",
                window.0, window.1
            )));
        }
        Ok(Self {
            bins,
            bin_width: hist.bin_width(),
            shape,
        })
    }
}

impl CostFunction for BinnedNll {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let norm = p[0].exp() * self.bin_width;
        Ok(self
            .bins
            .iter()
            .map(|&(x, n)| {
                let mu = (norm * (self.shape)(x, p)).max(1e-300);
                mu - n * mu.ln()
            })
            .sum())
    }
}

/// Normal density; parameters `[ln norm, mean, ln sigma]`.
fn gauss_shape(x: f64, p: &[f64]) -> f64 {
    let sigma = p[2].exp();
    let z = (x - p[1]) / sigma;
    (-0.5 * z * z).exp() / ((2.0 * PI).sqrt() * sigma)
}

/// Landau-Gauss density; parameters `[ln norm, mpv, ln width, ln sigma]`.
fn landau_shape(x: f64, p: &[f64]) -> f64 {
    landau_gauss(x, p[1], p[2].exp(), p[3].exp())
}

fn check_in_window(what: &str, value: f64, window: (f64, f64)) -> Result<()> {
    if value.is_finite() && value >= window.0 && value <= window.1 {
        Ok(())
    } else {
        Err(Error::Fit(format!(
            "{what} {value} outside fit window [{:.1}, {:.1}]",
            window.0, window.1
        )))
    }
}

impl FitEngine for StandardFitter {
    fn name(&self) -> &'static str {
        "Standard"
    }

    fn fit_gaussian(&self, hist: &Histogram, window: (f64, f64)) -> Result<GaussFit> {
        let problem = BinnedNll::new(hist, window, gauss_shape)?;
        let stats = hist
            .window_stats(window.0, window.1)
            .ok_or_else(|| Error::Fit("empty Gaussian fit window".into()))?;
        let sigma0 = stats.rms.max(0.5 * hist.bin_width());
        let start = [stats.weight.ln(), stats.mean, sigma0.ln()];
        let p = self.minimize(problem, &start, &[0.1, 0.2 * sigma0, 0.2])?;

        let fit = GaussFit {
            mean: p[1],
            sigma: p[2].exp(),
            norm: p[0].exp(),
        };
        check_in_window("Gaussian mean", fit.mean, window)?;
        if !fit.sigma.is_finite() || fit.sigma <= 0.0 {
            return Err(Error::Fit(format!("non-physical Gaussian sigma {}", fit.sigma)));
        }
        Ok(fit)
    }

    fn fit_line(&self, points: &[FitPoint]) -> Result<LineFit> {
        if points.len() < 2 {
            return Err(Error::Fit(format!(
                "line fit needs 2 points, got {}",
                points.len()
            )));
        }
        let weighted = points.iter().all(|p| p.sigma.is_some());
        let (mut s, mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for p in points {
            let w = match p.sigma {
                Some(sigma) if weighted => {
                    if !(sigma > 0.0) {
                        return Err(Error::Fit(format!("non-positive point error {sigma}")));
                    }
                    1.0 / (sigma * sigma)
                }
                _ => 1.0,
            };
            s += w;
            sx += w * p.x;
            sy += w * p.y;
            sxx += w * p.x * p.x;
            sxy += w * p.x * p.y;
        }
        let delta = s * sxx - sx * sx;
        if delta <= 1e-12 * s * sxx.abs().max(1.0) {
            return Err(Error::Fit("degenerate line fit (all x equal)".into()));
        }
        let slope = (s * sxy - sx * sy) / delta;
        let intercept = (sxx * sy - sx * sxy) / delta;

        // Unweighted errors scale with the residual variance.
        let scale = if weighted {
            1.0
        } else if points.len() > 2 {
            let chi2: f64 = points
                .iter()
                .map(|p| (p.y - intercept - slope * p.x).powi(2))
                .sum();
            chi2 / (points.len() - 2) as f64
        } else {
            0.0
        };
        Ok(LineFit {
            slope,
            intercept,
            slope_err: (scale * s / delta).sqrt(),
            intercept_err: (scale * sxx / delta).sqrt(),
        })
    }

    fn fit_quadratic(&self, points: &[(f64, f64)]) -> Result<Quadratic> {
        if points.len() < 3 {
            return Err(Error::Fit(format!(
                "quadratic fit needs 3 points, got {}",
                points.len()
            )));
        }
        // Centered and scaled abscissa keeps the normal matrix conditioned.
        let n = points.len() as f64;
        let m = points.iter().map(|p| p.0).sum::<f64>() / n;
        let scale = points
            .iter()
            .map(|p| (p.0 - m).abs())
            .fold(0.0_f64, f64::max);
        if scale <= 0.0 {
            return Err(Error::Fit("degenerate quadratic fit (all x equal)".into()));
        }

        let mut ata = Matrix3::<f64>::zeros();
        let mut aty = Vector3::<f64>::zeros();
        for &(x, y) in points {
            let u = (x - m) / scale;
            let row = Vector3::new(1.0, u, u * u);
            ata += row * row.transpose();
            aty += row * y;
        }
        let coef = ata
            .lu()
            .solve(&aty)
            .ok_or_else(|| Error::Fit("singular quadratic normal equations".into()))?;

        let (a0, b0, c0) = (coef[0], coef[1], coef[2]);
        let c = c0 / (scale * scale);
        let b = b0 / scale - 2.0 * c * m;
        let a = a0 - b0 * m / scale + c * m * m;
        Ok(Quadratic { a, b, c })
    }

    fn fit_landau(&self, hist: &Histogram, window: (f64, f64)) -> Result<LandauFit> {
        let problem = BinnedNll::new(hist, window, landau_shape)?;
        let stats = hist
            .window_stats(window.0, window.1)
            .ok_or_else(|| Error::Fit("empty Landau fit window".into()))?;
        let mpv0 = hist
            .window(window.0, window.1)
            .fold((stats.mean, f64::NEG_INFINITY), |best, (x, n)| {
                if n > best.1 {
                    (x, n)
                } else {
                    best
                }
            })
            .0;
        let spread0 = (0.25 * stats.rms).max(hist.bin_width());
        let start = [stats.weight.ln(), mpv0, spread0.ln(), spread0.ln()];
        let p = self.minimize(problem, &start, &[0.1, spread0, 0.3, 0.3])?;

        let fit = LandauFit {
            mpv: p[1],
            width: p[2].exp(),
            sigma: p[3].exp(),
            norm: p[0].exp(),
        };
        check_in_window("Landau MPV", fit.mpv, window)?;
        if !(fit.width.is_finite() && fit.width > 0.0) {
            return Err(Error::Fit(format!("non-physical Landau width {}", fit.width)));
        }
        Ok(fit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landau::{landau, LANDAU_PEAK};
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn filled_gauss(mean: f64, sigma: f64, n: f64) -> Histogram {
        // Deterministic expected counts, rounded.
        let mut h = Histogram::new(200, 400.0, 600.0);
        for bin in 0..h.n_bins() {
            let x = h.bin_center(bin);
            let expected = n * gauss_shape(x, &[0.0, mean, sigma.ln()]);
            for _ in 0..expected.round() as usize {
                h.fill(x);
            }
        }
        h
    }

    #[test]
    fn test_gaussian_fit_recovers_parameters() {
        let h = filled_gauss(500.0, 10.0, 20_000.0);
        let fit = StandardFitter::new().fit_gaussian(&h, (450.0, 550.0)).unwrap();
        assert_abs_diff_eq!(fit.mean, 500.0, epsilon = 0.1);
        assert_relative_eq!(fit.sigma, 10.0, max_relative = 0.02);
        assert_relative_eq!(fit.norm, 20_000.0, max_relative = 0.02);
    }

    #[test]
    fn test_gaussian_fit_rejects_empty_window() {
        let h = filled_gauss(500.0, 10.0, 1000.0);
        let err = StandardFitter::new().fit_gaussian(&h, (580.0, 599.0)).unwrap_err();
        assert!(matches!(err, Error::Fit(_)));
    }

    #[test]
    fn test_iteration_cap_is_a_fit_failure() {
        let h = filled_gauss(500.0, 10.0, 20_000.0);
        let err = StandardFitter::new()
            .with_max_iters(2)
            .fit_gaussian(&h, (450.0, 550.0))
            .unwrap_err();
        assert!(matches!(err, Error::Fit(ref msg) if msg.contains("2 iterations")), "{err}");
    }

    #[test]
    fn test_line_fit_exact_and_weighted() {
        let fitter = StandardFitter::new();
        let pts: Vec<FitPoint> = (0..5)
            .map(|i| FitPoint::new(f64::from(i), 3.0 - 0.5 * f64::from(i)))
            .collect();
        let fit = fitter.fit_line(&pts).unwrap();
        assert_abs_diff_eq!(fit.slope, -0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.intercept, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.slope_err, 0.0, epsilon = 1e-9);

        let weighted = [
            FitPoint::with_sigma(0.0, 0.0, 1.0),
            FitPoint::with_sigma(1.0, 1.0, 1.0),
            FitPoint::with_sigma(2.0, 2.0, 1.0),
        ];
        let fit = fitter.fit_line(&weighted).unwrap();
        assert_abs_diff_eq!(fit.slope, 1.0, epsilon = 1e-12);
        // Var(slope) = S / Delta = 3 / (3 * 5 - 9).
        assert_abs_diff_eq!(fit.slope_err, 0.5_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_line_fit_degenerate() {
        let pts = [FitPoint::new(2.0, 1.0), FitPoint::new(2.0, 3.0)];
        assert!(StandardFitter::new().fit_line(&pts).is_err());
        assert!(StandardFitter::new().fit_line(&pts[..1]).is_err());
    }

    #[test]
    fn test_quadratic_fit_large_offsets() {
        let pts: Vec<(f64, f64)> = (0..7)
            .map(|i| {
                let x = 1500.0 + 20.0 * f64::from(i);
                (x, 4.0 + 2.0 * x + 1e-4 * x * x)
            })
            .collect();
        let q = StandardFitter::new().fit_quadratic(&pts).unwrap();
        for &(x, y) in &pts {
            assert_relative_eq!(q.eval(x), y, max_relative = 1e-9);
        }
        assert_relative_eq!(q.c, 1e-4, max_relative = 1e-6);
        assert!(StandardFitter::new().fit_quadratic(&pts[..2]).is_err());
    }

    #[test]
    fn test_landau_fit_recovers_mpv() {
        let (mpv, width, n) = (400.0, 20.0, 50_000.0);
        let mut h = Histogram::new(400, 0.0, 2000.0);
        for bin in 0..h.n_bins() {
            let x = h.bin_center(bin);
            let expected = n * h.bin_width() * landau(x, mpv, width);
            for _ in 0..expected.round() as usize {
                h.fill(x);
            }
        }
        assert!(landau(mpv, mpv, width) > landau(mpv + 1.0, mpv, width));
        assert_abs_diff_eq!(LANDAU_PEAK, -0.2228, epsilon = 1e-4);

        let fit = StandardFitter::new().fit_landau(&h, (240.0, 720.0)).unwrap();
        assert_relative_eq!(fit.mpv, mpv, max_relative = 0.01);
        assert!(fit.width > 0.0);
    }
}
