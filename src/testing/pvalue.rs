//! P-values from Wald statistics

use statrs::distribution::{ContinuousCDF, Normal};

/// Two-sided p-value of a standard normal statistic; NaN for a non-finite one
pub fn wald_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    match Normal::new(0.0, 1.0) {
        Ok(normal) => 2.0 * normal.cdf(-z.abs()),
        Err(_) => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pvalue_symmetric() {
        assert!((wald_pvalue(2.0) - wald_pvalue(-2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_pvalue_known() {
        assert!((wald_pvalue(0.0) - 1.0).abs() < 1e-12);
        assert!((wald_pvalue(1.959963984540054) - 0.05).abs() < 1e-9);
        assert!(wald_pvalue(f64::NAN).is_nan());
    }
}
