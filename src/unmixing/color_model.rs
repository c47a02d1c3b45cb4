use crate::error::Error;
use crate::unmixing::{Mat3, Vec3};

/// Statistical description of a layer's expected color distribution.
///
/// A model supplies a scalar distance, its gradient, and a representative
/// color used to seed the per-pixel solver. Implementations must be pure.
pub trait ColorModel: Send + Sync {
    /// Distance from `color` to the model (larger = less likely).
    fn distance(&self, color: &Vec3) -> f64;

    /// Gradient of [`ColorModel::distance`] with respect to `color`.
    fn distance_gradient(&self, color: &Vec3) -> Vec3;

    /// A color considered typical for this model.
    fn representative_color(&self) -> Vec3;
}

/// Multivariate normal color model.
///
/// The distance is the squared Mahalanobis distance
/// `(c − μ)ᵗ·Σ⁻¹·(c − μ)`. The inverse covariance is validated to be
/// symmetric (and, via inversion, nonsingular) at construction; the model is
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianColorModel {
    mean: Vec3,
    sigma_inv: Mat3,
}

const SYMMETRY_TOLERANCE: f64 = 1e-9;

impl GaussianColorModel {
    /// Builds a model from a mean and a covariance matrix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCovariance`] when the covariance is not
    /// symmetric or cannot be inverted.
    pub fn new(mean: Vec3, covariance: Mat3) -> Result<Self, Error> {
        if !is_symmetric(&covariance) {
            return Err(Error::InvalidCovariance);
        }
        let sigma_inv = covariance.try_inverse().ok_or(Error::InvalidCovariance)?;
        Ok(GaussianColorModel { mean, sigma_inv })
    }

    /// Builds a model directly from a mean and an inverse covariance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCovariance`] when the matrix is not symmetric
    /// or is singular.
    pub fn from_inverse_covariance(mean: Vec3, sigma_inv: Mat3) -> Result<Self, Error> {
        if !is_symmetric(&sigma_inv) || sigma_inv.try_inverse().is_none() {
            return Err(Error::InvalidCovariance);
        }
        Ok(GaussianColorModel { mean, sigma_inv })
    }

    pub fn mean(&self) -> &Vec3 {
        &self.mean
    }

    pub fn inverse_covariance(&self) -> &Mat3 {
        &self.sigma_inv
    }

    /// Covariance recovered by inverting the stored inverse covariance.
    pub fn covariance(&self) -> Mat3 {
        // Invertibility was checked at construction.
        self.sigma_inv
            .try_inverse()
            .unwrap_or_else(Mat3::identity)
    }
}

impl ColorModel for GaussianColorModel {
    fn distance(&self, color: &Vec3) -> f64 {
        let diff = color - self.mean;
        (diff.transpose() * self.sigma_inv * diff)[0]
    }

    fn distance_gradient(&self, color: &Vec3) -> Vec3 {
        2.0 * self.sigma_inv * (color - self.mean)
    }

    fn representative_color(&self) -> Vec3 {
        self.mean
    }
}

fn is_symmetric(m: &Mat3) -> bool {
    (m - m.transpose()).abs().max() <= SYMMETRY_TOLERANCE
}
