//! Statistical helpers shared across modules
//!
//! Robust location/scale estimators, quantiles, the weighted upper quantile
//! used for the fold change prior, trigamma and a LOWESS smoother.

use std::cmp::Ordering;

/// 97.5th percentile of the standard normal
const QNORM_0975: f64 = 1.959963984540054;

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

/// Median of the finite values; NaN when there are none
pub fn median(values: &[f64]) -> f64 {
    let v = sorted_finite(values);
    let n = v.len();
    match n {
        0 => f64::NAN,
        _ if n % 2 == 1 => v[n / 2],
        _ => 0.5 * (v[n / 2 - 1] + v[n / 2]),
    }
}

/// Median absolute deviation, scaled by 1.4826 for consistency with the SD
pub fn mad(values: &[f64]) -> f64 {
    let center = median(values);
    let dev: Vec<f64> = values
        .iter()
        .filter(|x| x.is_finite())
        .map(|x| (x - center).abs())
        .collect();
    1.4826 * median(&dev)
}

/// Mean after dropping `floor(n * trim)` values from each end
pub fn trimmed_mean(values: &[f64], trim: f64) -> f64 {
    let v = sorted_finite(values);
    let n = v.len();
    if n == 0 {
        return 0.0;
    }
    let k = (n as f64 * trim).floor() as usize;
    let kept = if 2 * k >= n { &v[..] } else { &v[k..n - k] };
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Sample quantile with linear interpolation between order statistics
/// (Hyndman-Fan type 7). `sorted` must be ascending.
pub fn quantile_type7(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        1 => sorted[0],
        _ => {
            let h = (n as f64 - 1.0) * p.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Weighted quantile with normalized weights and right-continuous step
/// interpolation over the cumulative weights.
///
/// Entries with zero or NaN weight, or NaN value, are ignored.
pub fn weighted_quantile(x: &[f64], weights: &[f64], prob: f64) -> f64 {
    let mut pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(weights)
        .filter(|(&xi, &wi)| wi > 0.0 && !xi.is_nan() && !wi.is_nan())
        .map(|(&xi, &wi)| (xi, wi))
        .collect();
    if pairs.is_empty() {
        return 0.0;
    }
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let norm = pairs.len() as f64 / pairs.iter().map(|p| p.1).sum::<f64>();

    // Collapse ties, accumulating normalized weight
    let mut values: Vec<f64> = Vec::new();
    let mut cum_weights: Vec<f64> = Vec::new();
    let mut total = 0.0;
    for &(xi, wi) in &pairs {
        total += wi * norm;
        if values.last() == Some(&xi) {
            if let Some(last) = cum_weights.last_mut() {
                *last = total;
            }
        } else {
            values.push(xi);
            cum_weights.push(total);
        }
    }

    let order = 1.0 + (total - 1.0) * prob;
    let low = order.floor().max(1.0);
    let high = (low + 1.0).min(total);
    let frac = order - order.floor();

    let step = |target: f64| -> f64 {
        let idx = cum_weights.partition_point(|&c| c < target);
        values[idx.min(values.len() - 1)]
    };

    (1.0 - frac) * step(low) + frac * step(high)
}

/// Variance of a zero-centred normal whose `1 - upper_quantile` weighted
/// quantile of `|x|` matches the data.
pub fn match_weighted_upper_quantile_for_variance(
    x: &[f64],
    weights: &[f64],
    upper_quantile: f64,
) -> f64 {
    let abs_x: Vec<f64> = x.iter().map(|v| v.abs()).collect();
    let q = weighted_quantile(&abs_x, weights, 1.0 - upper_quantile);
    let sd = q / QNORM_0975;
    let var = sd * sd;
    log::debug!("weighted upper quantile {:.6}, variance {:.6}", q, var);
    if var > 0.0 && var.is_finite() {
        var
    } else {
        1e-6
    }
}

/// Trigamma function (derivative of digamma) for positive arguments
pub fn trigamma(mut x: f64) -> f64 {
    if x <= 0.0 || !x.is_finite() {
        return f64::NAN;
    }
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc + 1.0 / x
        + x2 / 2.0
        + x2 / x * (1.0 / 6.0 - x2 * (1.0 / 30.0 - x2 * (1.0 / 42.0 - x2 / 30.0)))
}

/// Locally weighted linear regression (tricube kernel) with bisquare
/// robustness iterations. `x` must be sorted ascending.
pub fn lowess(x: &[f64], y: &[f64], span: f64, iterations: usize) -> Vec<f64> {
    let n = x.len();
    if n < 2 || y.len() != n {
        return y.to_vec();
    }
    let k = ((span * n as f64 + 1e-7) as usize).clamp(2, n);
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for iter in 0..=iterations {
        for i in 0..n {
            let mut dist: Vec<f64> = x.iter().map(|xj| (xj - x[i]).abs()).collect();
            dist.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            let h = dist[k - 1];

            let w: Vec<f64> = (0..n)
                .map(|j| {
                    let d = (x[j] - x[i]).abs();
                    let kernel = if h <= 0.0 {
                        if d == 0.0 {
                            1.0
                        } else {
                            0.0
                        }
                    } else if d >= h {
                        0.0
                    } else {
                        (1.0 - (d / h).powi(3)).powi(3)
                    };
                    kernel * robustness[j]
                })
                .collect();

            let sw: f64 = w.iter().sum();
            if sw <= 0.0 {
                fitted[i] = y[i];
                continue;
            }
            let xm = w.iter().zip(x).map(|(wj, xj)| wj * xj).sum::<f64>() / sw;
            let ym = w.iter().zip(y).map(|(wj, yj)| wj * yj).sum::<f64>() / sw;
            let sxx: f64 = w.iter().zip(x).map(|(wj, xj)| wj * (xj - xm).powi(2)).sum();
            let sxy: f64 = (0..n).map(|j| w[j] * (x[j] - xm) * (y[j] - ym)).sum();
            fitted[i] = if sxx > 1e-12 * sw {
                ym + sxy / sxx * (x[i] - xm)
            } else {
                ym
            };
        }

        if iter == iterations {
            break;
        }
        let residuals: Vec<f64> = (0..n).map(|i| (y[i] - fitted[i]).abs()).collect();
        let s = median(&residuals);
        if s <= 1e-12 {
            break;
        }
        for (r, res) in robustness.iter_mut().zip(&residuals) {
            let u = res / (6.0 * s);
            *r = if u < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }
    fitted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_and_mad() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
        let m = mad(&[1.0, 2.0, 3.0, 4.0, 100.0]);
        assert!((m - 1.4826).abs() < 1e-12);
    }

    #[test]
    fn test_trimmed_mean() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        assert!((trimmed_mean(&v, 1.0 / 8.0) - 4.5).abs() < 1e-12);
        assert!((trimmed_mean(&[1.0, 2.0, 3.0, 4.0, 1000.0], 0.2) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_quantile_type7() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_type7(&v, 0.0), 1.0);
        assert_eq!(quantile_type7(&v, 1.0), 4.0);
        assert!((quantile_type7(&v, 0.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_quantile_uniform() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let w = [1.0; 5];
        assert!((weighted_quantile(&x, &w, 0.5) - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_weighted_quantile_skewed() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let w = [1.0, 1.0, 1.0, 1.0, 100.0];
        assert!(weighted_quantile(&x, &w, 0.5) >= 4.0);
    }

    #[test]
    fn test_upper_quantile_variance() {
        let x = [0.1, -0.2, 0.3, -0.1, 0.5, -0.3, 0.2, -0.4, 0.15, -0.25];
        let var = match_weighted_upper_quantile_for_variance(&x, &[1.0; 10], 0.05);
        assert!(var > 0.0 && var.is_finite());
        assert!(var < 0.1);
    }

    #[test]
    fn test_trigamma_values() {
        // trigamma(1) = pi^2 / 6
        let pi2_6 = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - pi2_6).abs() < 1e-10);
        // trigamma(0.5) = pi^2 / 2
        assert!((trigamma(0.5) - 3.0 * pi2_6).abs() < 1e-10);
        assert!(trigamma(0.0).is_nan());
    }

    #[test]
    fn test_lowess_linear_is_exact() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let fit = lowess(&x, &y, 0.3, 3);
        for (f, t) in fit.iter().zip(&y) {
            assert!((f - t).abs() < 1e-8);
        }
    }

    #[test]
    fn test_lowess_downweights_outlier() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let mut y: Vec<f64> = x.iter().map(|v| v + 0.5 * v.sin()).collect();
        y[15] += 10.0;
        let plain = lowess(&x, &y, 0.5, 0);
        let robust = lowess(&x, &y, 0.5, 3);
        let plain_err = (plain[15] - 15.0).abs();
        let robust_err = (robust[15] - 15.0).abs();
        assert!(robust_err < plain_err);
        assert!(robust_err < 0.8);
    }
}
