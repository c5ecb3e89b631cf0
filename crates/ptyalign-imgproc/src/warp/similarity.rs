use crate::error::ImgprocError;

/// Determinants below this threshold are treated as singular.
const SINGULARITY_EPS: f64 = 1e-12;

/// A 3x3 homogeneous similarity transform in `(row, col)` coordinates.
///
/// The top-left 2x2 block is always `scale * R(theta)` (a uniformly scaled
/// pure rotation, no shear) and the last row is `[0, 0, 1]`. Points are
/// column vectors `(row, col, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    /// Row-major 3x3 homogeneous matrix.
    pub matrix: [[f64; 3]; 3],
}

impl Default for SimilarityTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Display for SimilarityTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (dy, dx) = self.translation();
        write!(
            f,
            "Similarity(scale={:.4}, rot={:.3}°, dy={:.2}, dx={:.2})",
            self.scale_factor(),
            self.rotation_deg(),
            dy,
            dx
        )
    }
}

impl SimilarityTransform {
    /// Create the identity transform.
    pub fn identity() -> Self {
        Self {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Build a similarity transform applied about a center point.
    ///
    /// The rotation/scale block is `R = scale * [[cos t, -sin t], [sin t, cos t]]`
    /// with `t = rotation_deg` in radians, and the translation component is
    /// `center - R * center + (dy, dx)`: the rotation and scale act about
    /// `center`, then the explicit `(dy, dx)` shift is added.
    ///
    /// A non-positive `scale` is not rejected; it produces a flipped or
    /// non-invertible matrix and is the caller's responsibility.
    ///
    /// # Arguments
    ///
    /// * `scale` - The uniform scale factor.
    /// * `rotation_deg` - The rotation angle in degrees.
    /// * `dy` - The row shift in pixels, applied after the rotation.
    /// * `dx` - The column shift in pixels, applied after the rotation.
    /// * `center` - The `(row, col)` center the rotation and scale act about.
    pub fn from_params(
        scale: f64,
        rotation_deg: f64,
        dy: f64,
        dx: f64,
        center: (f64, f64),
    ) -> Self {
        let theta = rotation_deg.to_radians();
        let (sin_t, cos_t) = theta.sin_cos();

        let r00 = scale * cos_t;
        let r01 = -scale * sin_t;
        let r10 = scale * sin_t;
        let r11 = scale * cos_t;

        let ty = center.0 - (r00 * center.0 + r01 * center.1) + dy;
        let tx = center.1 - (r10 * center.0 + r11 * center.1) + dx;

        Self {
            matrix: [[r00, r01, ty], [r10, r11, tx], [0.0, 0.0, 1.0]],
        }
    }

    /// Compose two transforms so that `first` is applied first.
    ///
    /// This is the matrix product `self * first`; chaining coarse-to-fine
    /// corrections is `correction.compose(&coarse)`.
    pub fn compose(&self, first: &Self) -> Self {
        let a = &self.matrix;
        let b = &first.matrix;
        let mut m = [[0.0; 3]; 3];
        for (i, row) in m.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
            }
        }
        Self { matrix: m }
    }

    /// Apply the transform to a `(row, col)` point.
    pub fn apply(&self, point: (f64, f64)) -> (f64, f64) {
        let m = &self.matrix;
        (
            m[0][0] * point.0 + m[0][1] * point.1 + m[0][2],
            m[1][0] * point.0 + m[1][1] * point.1 + m[1][2],
        )
    }

    /// Determinant of the linear 2x2 block.
    pub fn det(&self) -> f64 {
        let m = &self.matrix;
        m[0][0] * m[1][1] - m[0][1] * m[1][0]
    }

    /// Invert the transform.
    ///
    /// The inverse linear block and inverse-transformed offset are computed
    /// explicitly since backward resampling is undefined for a singular
    /// linear part.
    ///
    /// # Errors
    ///
    /// Returns [`ImgprocError::SingularTransform`] when the determinant of
    /// the linear block is (near) zero.
    pub fn inverse(&self) -> Result<Self, ImgprocError> {
        let det = self.det();
        if det.abs() < SINGULARITY_EPS {
            return Err(ImgprocError::SingularTransform(det));
        }

        let m = &self.matrix;
        let inv_det = 1.0 / det;

        let a00 = m[1][1] * inv_det;
        let a01 = -m[0][1] * inv_det;
        let a10 = -m[1][0] * inv_det;
        let a11 = m[0][0] * inv_det;

        let ty = -(a00 * m[0][2] + a01 * m[1][2]);
        let tx = -(a10 * m[0][2] + a11 * m[1][2]);

        Ok(Self {
            matrix: [[a00, a01, ty], [a10, a11, tx], [0.0, 0.0, 1.0]],
        })
    }

    /// Uniform scale factor of the linear block.
    pub fn scale_factor(&self) -> f64 {
        let m = &self.matrix;
        (m[0][0] * m[0][0] + m[1][0] * m[1][0]).sqrt()
    }

    /// Rotation angle of the linear block in degrees.
    pub fn rotation_deg(&self) -> f64 {
        self.matrix[1][0].atan2(self.matrix[0][0]).to_degrees()
    }

    /// Translation component `(dy, dx)`.
    pub fn translation(&self) -> (f64, f64) {
        (self.matrix[0][2], self.matrix[1][2])
    }
}
