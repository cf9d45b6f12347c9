//! Sim3: 7-DOF similarity transformation (rotation + translation + scale).
//!
//! Every chunk reconstruction lives in its own gauge: the inference model picks
//! an arbitrary origin, orientation and metric scale per chunk. Sim3 is the
//! group that relates two such gauges, and the rigid subset (scale = 1) is used
//! when the alignment mode forbids scale changes.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// Dimension of the full Sim3 chart `[rotvec (3), translation (3), ln(scale) (1)]`.
pub const SIM3_DOF: usize = 7;

/// Dimension of the rigid chart (scale held at 1).
pub const SE3_DOF: usize = 6;

/// 7-DOF similarity transformation.
///
/// Transforms points as: p' = s * R * p + t
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sim3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    pub scale: f64,
}

impl Sim3 {
    /// Identity transformation (no rotation, no translation, scale = 1).
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            scale: 1.0,
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>, scale: f64) -> Self {
        Self {
            rotation,
            translation,
            scale,
        }
    }

    /// Rigid transform (scale = 1).
    pub fn rigid(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self::new(rotation, translation, 1.0)
    }

    /// Pure uniform scaling about the origin.
    pub fn from_scale(scale: f64) -> Self {
        Self {
            scale,
            ..Self::identity()
        }
    }

    /// Construct from a (possibly slightly non-orthonormal) rotation matrix.
    pub fn from_rotation_matrix(
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
        scale: f64,
    ) -> Self {
        let rot3 = Rotation3::from_matrix_unchecked(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
            scale,
        }
    }

    /// Inverse transformation.
    ///
    /// For S = [sR | t]: S^{-1} = [(1/s)R^T | -(1/s)R^T t]
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        let scale_inv = 1.0 / self.scale;
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation) * scale_inv,
            scale: scale_inv,
        }
    }

    /// Group law: `self ∘ other`, i.e. apply `other` first, then `self`.
    ///
    /// [s1 R1 | t1] ∘ [s2 R2 | t2] = [s1 s2 R1 R2 | s1 R1 t2 + t1]
    pub fn compose(&self, other: &Sim3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.scale * (self.rotation * other.translation) + self.translation,
            scale: self.scale * other.scale,
        }
    }

    /// Relative transform `self^{-1} ∘ other`: maps `other`'s frame into `self`'s.
    pub fn between(&self, other: &Sim3) -> Self {
        self.inverse().compose(other)
    }

    /// Transform a single point: p' = s * R * p + t.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.scale * (self.rotation * p) + self.translation
    }

    /// Chart coordinates `[rotvec, translation, ln(scale)]`.
    ///
    /// Zero exactly at identity; used both as the optimizer's parameterization
    /// and as the residual of a relative transform.
    pub fn to_chart(&self) -> [f64; SIM3_DOF] {
        let rot_vec = self.rotation.scaled_axis();
        [
            rot_vec.x,
            rot_vec.y,
            rot_vec.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
            self.scale.ln(),
        ]
    }

    /// Inverse of [`Sim3::to_chart`].
    pub fn from_chart(chart: &[f64; SIM3_DOF]) -> Self {
        let rot_vec = Vector3::new(chart[0], chart[1], chart[2]);
        Self {
            rotation: UnitQuaternion::from_scaled_axis(rot_vec),
            translation: Vector3::new(chart[3], chart[4], chart[5]),
            scale: chart[6].exp(),
        }
    }

    /// Magnitude of the difference between two transforms, measured in the chart.
    pub fn distance(&self, other: &Sim3) -> f64 {
        self.between(other)
            .to_chart()
            .iter()
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.scale.is_finite()
            && self.scale > 0.0
            && self.translation.iter().all(|v| v.is_finite())
            && self.rotation.coords.iter().all(|v| v.is_finite())
    }
}

impl Default for Sim3 {
    fn default() -> Self {
        Self::identity()
    }
}
