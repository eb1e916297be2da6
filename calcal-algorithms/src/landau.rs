//! Landau density and its convolution with a Gaussian.
#![allow(clippy::excessive_precision, clippy::unreadable_literal)]

use std::f64::consts::PI;

/// Location of the maximum of the standard Landau density.
pub const LANDAU_PEAK: f64 = -0.22278298;

const P1: [f64; 5] = [0.4259894875, -0.1249762550, 0.03984243700, -0.006298287635, 0.001511162253];
const Q1: [f64; 5] = [1.0, -0.3388260629, 0.09594393323, -0.01608042283, 0.003778942063];
const P2: [f64; 5] = [0.1788541609, 0.1173957403, 0.01488850518, -0.001394989411, 0.0001283617211];
const Q2: [f64; 5] = [1.0, 0.7428795082, 0.3153932961, 0.06694219548, 0.008790609714];
const P3: [f64; 5] = [
    0.1788544503,
    0.09359161662,
    0.006325387654,
    0.00006611667319,
    -0.000002031049101,
];
const Q3: [f64; 5] = [1.0, 0.6097809921, 0.2560616665, 0.04746722384, 0.006957301675];
const P4: [f64; 5] = [0.9874054407, 118.6723273, 849.2794360, -743.7792444, 427.0262186];
const Q4: [f64; 5] = [1.0, 106.8615961, 337.6496214, 2016.712389, 1597.063511];
const P5: [f64; 5] = [1.003675074, 167.5702434, 4789.711289, 21217.86767, -22324.94910];
const Q5: [f64; 5] = [1.0, 156.9424537, 3745.310488, 9834.698876, 66924.28357];
const P6: [f64; 5] = [1.000827619, 664.9143136, 62972.92665, 475554.6998, -5743609.109];
const Q6: [f64; 5] = [1.0, 651.4101098, 56974.73333, 165917.4725, -2815759.939];
const A1: [f64; 3] = [0.04166666667, -0.01996527778, 0.02709538966];
const A2: [f64; 2] = [-1.845568670, -4.284640743];

/// Number of integration steps over the Gaussian kernel.
const CONV_STEPS: u32 = 24;
/// Kernel half-width in Gaussian sigmas.
const CONV_SIGMAS: f64 = 5.0;

#[inline]
fn poly(c: &[f64; 5], v: f64) -> f64 {
    c[0] + (c[1] + (c[2] + (c[3] + c[4] * v) * v) * v) * v
}

/// Standard Landau density (rational approximation, relative accuracy ~1e-7).
#[must_use]
pub fn landau_density(v: f64) -> f64 {
    if v < -5.5 {
        let u = (v + 1.0).exp();
        if u < 1e-10 {
            return 0.0;
        }
        let ue = (-1.0 / u).exp();
        let us = u.sqrt();
        0.3989422803 * (ue / us) * (1.0 + (A1[0] + (A1[1] + A1[2] * u) * u) * u)
    } else if v < -1.0 {
        let u = (-v - 1.0).exp();
        (-u).exp() * u.sqrt() * poly(&P1, v) / poly(&Q1, v)
    } else if v < 1.0 {
        poly(&P2, v) / poly(&Q2, v)
    } else if v < 5.0 {
        poly(&P3, v) / poly(&Q3, v)
    } else if v < 12.0 {
        let u = 1.0 / v;
        u * u * poly(&P4, u) / poly(&Q4, u)
    } else if v < 50.0 {
        let u = 1.0 / v;
        u * u * poly(&P5, u) / poly(&Q5, u)
    } else if v < 300.0 {
        let u = 1.0 / v;
        u * u * poly(&P6, u) / poly(&Q6, u)
    } else {
        let u = 1.0 / (v - v * v.ln() / (v + 1.0));
        u * u * (1.0 + (A2[0] + A2[1] * u) * u)
    }
}

/// Landau density in `x` with its maximum at `mpv` and scale `width`.
#[must_use]
pub fn landau(x: f64, mpv: f64, width: f64) -> f64 {
    landau_density((x - mpv) / width + LANDAU_PEAK) / width
}

/// Landau density convolved with a Gaussian of width `sigma`.
///
/// The Landau parameters keep their meaning: `mpv` is the peak of the
/// unsmeared density.
#[must_use]
pub fn landau_gauss(x: f64, mpv: f64, width: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return landau(x, mpv, width);
    }
    let step = 2.0 * CONV_SIGMAS * sigma / f64::from(CONV_STEPS);
    let norm = step / ((2.0 * PI).sqrt() * sigma);
    (0..CONV_STEPS)
        .map(|i| {
            let t = x - CONV_SIGMAS * sigma + (f64::from(i) + 0.5) * step;
            let z = (x - t) / sigma;
            landau(t, mpv, width) * (-0.5 * z * z).exp()
        })
        .sum::<f64>()
        * norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_density_is_continuous_at_region_edges() {
        for edge in [-5.5, -1.0, 1.0, 5.0, 12.0, 50.0, 300.0] {
            let below = landau_density(edge - 1e-9);
            let above = landau_density(edge + 1e-9);
            assert_abs_diff_eq!(below, above, epsilon = 1e-6 * above.max(1e-12));
        }
    }

    #[test]
    fn test_peak_location() {
        let at_peak = landau_density(LANDAU_PEAK);
        assert!(at_peak > landau_density(LANDAU_PEAK - 0.01));
        assert!(at_peak > landau_density(LANDAU_PEAK + 0.01));
        assert_abs_diff_eq!(at_peak, 0.1806, epsilon = 1e-3);
    }

    #[test]
    fn test_normalization() {
        // Most of the tail mass lies beyond any finite cut; [-10, 1000]
        // holds about 99.9% of it.
        let step = 0.01;
        let total: f64 = (0..101_000)
            .map(|i| landau_density(-10.0 + (f64::from(i) + 0.5) * step) * step)
            .sum();
        assert!(total > 0.99 && total < 1.0, "integral {total}");
    }

    #[test]
    fn test_convolution_preserves_area() {
        let (mpv, width, sigma) = (100.0, 5.0, 4.0);
        let step = 0.25;
        let plain: f64 = (0..2000)
            .map(|i| landau(50.0 + f64::from(i) * step, mpv, width) * step)
            .sum();
        let smeared: f64 = (0..2000)
            .map(|i| landau_gauss(50.0 + f64::from(i) * step, mpv, width, sigma) * step)
            .sum();
        assert_abs_diff_eq!(plain, smeared, epsilon = 0.01);
    }
}
