use ndarray::{Array2, Zip};

/// Convert betas to t-statistics: `beta / sqrt(var)`.
///
/// Voxels with zero (or negative) variance carry no estimate and become 0.
pub fn beta_to_tstat(betas: &Array2<f64>, variances: &Array2<f64>) -> Array2<f64> {
    Zip::from(betas)
        .and(variances)
        .map_collect(|&b, &v| if v > 0.0 { b / v.sqrt() } else { 0.0 })
}
