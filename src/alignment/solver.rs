//! Closed-form similarity estimation between two point sets.
//!
//! Weighted Umeyama/Horn fit with a median-based outlier pass. The result maps
//! `source` points onto `target` points: `target ≈ s * R * source + t`.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::{median, Sim3};

/// Minimum number of correspondences for a determined fit.
pub const MIN_CORRESPONDENCES: usize = 2;

/// Source-side variance below which the fit is degenerate.
const DEGENERATE_VARIANCE: f64 = 1e-12;

/// Inlier threshold floor, relative to the target point spread.
const RELATIVE_RESIDUAL_FLOOR: f64 = 1e-6;

const MAX_REFINEMENT_ROUNDS: usize = 4;

/// Which transform family the aligner estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMode {
    /// Full similarity: rotation, translation and scale.
    Similarity,
    /// Rotation and translation only, scale fixed at 1.
    Rigid,
    /// Scale from the median depth ratio, then a rigid fit on rescaled points.
    ScaleThenRigid,
}

/// A single point correspondence between two reconstructions.
#[derive(Debug, Clone, Copy)]
pub struct Correspondence {
    pub source: Vector3<f64>,
    pub target: Vector3<f64>,
    pub weight: f64,
    /// Distance of `source` from its camera centre.
    pub source_depth: f64,
    /// Distance of `target` from its camera centre.
    pub target_depth: f64,
}

/// Robust fit result with residual diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentFit {
    pub transform: Sim3,
    pub correspondences: usize,
    pub inliers: usize,
    /// RMS residual over inliers, in target units.
    pub rms_residual: f64,
    /// `rms_residual` divided by the RMS spread of the inlier targets.
    pub normalized_residual: f64,
}

/// Weighted Umeyama. Returns `None` on degenerate input.
pub fn fit_weighted(corrs: &[Correspondence], with_scale: bool) -> Option<Sim3> {
    if corrs.len() < MIN_CORRESPONDENCES {
        return None;
    }
    let total_weight: f64 = corrs.iter().map(|c| c.weight).sum();
    if !(total_weight > f64::EPSILON) {
        return None;
    }

    let mut mu_source = Vector3::zeros();
    let mut mu_target = Vector3::zeros();
    for c in corrs {
        mu_source += c.weight * c.source;
        mu_target += c.weight * c.target;
    }
    mu_source /= total_weight;
    mu_target /= total_weight;

    let mut cov = Matrix3::zeros();
    let mut var_source = 0.0;
    for c in corrs {
        let ds = c.source - mu_source;
        let dt = c.target - mu_target;
        cov += c.weight * dt * ds.transpose();
        var_source += c.weight * ds.norm_squared();
    }
    cov /= total_weight;
    var_source /= total_weight;

    if var_source < DEGENERATE_VARIANCE {
        return None;
    }

    let svd = cov.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    // Reflection fix flips the axis with the smallest singular value.
    let mut signs = Vector3::new(1.0, 1.0, 1.0);
    if u.determinant() * v_t.determinant() < 0.0 {
        let smallest = svd.singular_values.imin();
        signs[smallest] = -1.0;
    }
    let rotation = u * Matrix3::from_diagonal(&signs) * v_t;

    let scale = if with_scale {
        svd.singular_values.component_mul(&signs).sum() / var_source
    } else {
        1.0
    };
    if !(scale.is_finite() && scale > 0.0) {
        return None;
    }

    let translation = mu_target - scale * rotation * mu_source;
    let transform = Sim3::from_rotation_matrix(rotation, translation, scale);
    transform.is_finite().then_some(transform)
}

/// Median of `target_depth / source_depth` over correspondences with
/// positive depths.
pub fn estimate_depth_scale(corrs: &[Correspondence]) -> Option<f64> {
    let ratios: Vec<f64> = corrs
        .iter()
        .filter(|c| c.source_depth > f64::EPSILON && c.target_depth > f64::EPSILON)
        .map(|c| c.target_depth / c.source_depth)
        .collect();
    median(&ratios).filter(|s| s.is_finite() && *s > 0.0)
}

fn fit_mode(corrs: &[Correspondence], mode: AlignmentMode) -> Option<Sim3> {
    match mode {
        AlignmentMode::Similarity => fit_weighted(corrs, true),
        AlignmentMode::Rigid => fit_weighted(corrs, false),
        AlignmentMode::ScaleThenRigid => {
            let scale = estimate_depth_scale(corrs)?;
            let rescaled: Vec<Correspondence> = corrs
                .iter()
                .map(|c| Correspondence {
                    source: c.source * scale,
                    ..*c
                })
                .collect();
            let rigid = fit_weighted(&rescaled, false)?;
            Some(rigid.compose(&Sim3::from_scale(scale)))
        }
    }
}

fn residuals(transform: &Sim3, corrs: &[Correspondence]) -> Vec<f64> {
    corrs
        .iter()
        .map(|c| (transform.transform_point(&c.source) - c.target).norm())
        .collect()
}

fn target_spread(corrs: &[Correspondence]) -> f64 {
    if corrs.is_empty() {
        return 0.0;
    }
    let n = corrs.len() as f64;
    let centroid = corrs.iter().map(|c| c.target).sum::<Vector3<f64>>() / n;
    (corrs
        .iter()
        .map(|c| (c.target - centroid).norm_squared())
        .sum::<f64>()
        / n)
        .sqrt()
}

/// Fit, reject correspondences beyond `outlier_factor` times the median
/// residual, then refit on the inliers until the inlier set settles.
pub fn robust_fit(
    corrs: &[Correspondence],
    mode: AlignmentMode,
    outlier_factor: f64,
) -> Option<AlignmentFit> {
    let mut transform = fit_mode(corrs, mode)?;
    let floor = RELATIVE_RESIDUAL_FLOOR * target_spread(corrs);
    let mut inlier_mask = vec![true; corrs.len()];

    for _ in 0..MAX_REFINEMENT_ROUNDS {
        let all_residuals = residuals(&transform, corrs);
        let threshold = match median(&all_residuals) {
            Some(m) => (outlier_factor * m).max(floor),
            None => break,
        };
        let mask: Vec<bool> = all_residuals.iter().map(|&r| r <= threshold).collect();
        if mask == inlier_mask {
            break;
        }
        let subset: Vec<Correspondence> = corrs
            .iter()
            .zip(&mask)
            .filter(|(_, &keep)| keep)
            .map(|(c, _)| *c)
            .collect();
        if subset.len() < MIN_CORRESPONDENCES {
            break;
        }
        match fit_mode(&subset, mode) {
            Some(refit) => {
                transform = refit;
                inlier_mask = mask;
            }
            None => break,
        }
    }

    let used: Vec<Correspondence> = corrs
        .iter()
        .zip(&inlier_mask)
        .filter(|(_, &keep)| keep)
        .map(|(c, _)| *c)
        .collect();

    let final_residuals = residuals(&transform, &used);
    let rms_residual = (final_residuals.iter().map(|r| r * r).sum::<f64>()
        / final_residuals.len().max(1) as f64)
        .sqrt();
    let used_spread = target_spread(&used);
    let normalized_residual = if used_spread > f64::EPSILON {
        rms_residual / used_spread
    } else {
        rms_residual
    };

    Some(AlignmentFit {
        transform,
        correspondences: corrs.len(),
        inliers: used.len(),
        rms_residual,
        normalized_residual,
    })
}
