//! Scalar material models for the fiber strain-energy density.
//!
//! A material maps a fiber strain delta = stretch - 1 to the energy density
//! w(delta) and its first two derivatives, which enter the nodal forces and
//! the stiffness blocks. The default model is the semi-affine fiber law:
//! an exponentially softening buckling regime under compression, a linear
//! regime for small extension, and an exponentially stiffening regime past
//! an onset strain.

use crate::error::{Result, SolverError};

/// Energy density and its first two strain derivatives at a single strain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialResponse {
    pub energy: f64,
    pub slope: f64,
    pub curvature: f64,
}

/// A scalar strain-energy density function. Implementations are pure and
/// reentrant; the kernel evaluates them from worker threads.
pub trait MaterialModel: Send + Sync {
    fn evaluate(&self, strain: f64) -> MaterialResponse;
}

/// Plain quadratic energy, w = k/2 * delta^2. Handy as a reference material
/// and for the stiffening-ratio report.
#[derive(Debug, Clone, Copy)]
pub struct LinearSpring {
    pub stiffness: f64,
}

impl MaterialModel for LinearSpring {
    fn evaluate(&self, strain: f64) -> MaterialResponse {
        MaterialResponse {
            energy: 0.5 * self.stiffness * strain * strain,
            slope: self.stiffness * strain,
            curvature: self.stiffness,
        }
    }
}

/// The semi-affine fiber material.
///
/// The stiffness (second derivative of the energy density) is piecewise:
///
/// - `k * exp(delta / buckling_rate)` for delta < 0 (fiber buckling),
/// - `k` for 0 <= delta < stiffening_onset (straightened fibers),
/// - `k * exp((delta - onset) / stiffening_rate)` beyond the onset.
///
/// Energy and slope follow by integrating twice with w(0) = w'(0) = 0, so
/// all three quantities are continuous across the regime boundaries. Absent
/// optional regimes extend the linear branch.
#[derive(Debug, Clone, Copy)]
pub struct SemiAffineFiberMaterial {
    pub stiffness: f64,
    pub buckling_rate: Option<f64>,
    pub stiffening_onset: Option<f64>,
    pub stiffening_rate: Option<f64>,
}

impl SemiAffineFiberMaterial {
    /// Full model with buckling and stiffening regimes.
    pub fn new(
        stiffness: f64,
        buckling_rate: f64,
        stiffening_onset: f64,
        stiffening_rate: f64,
    ) -> Self {
        Self {
            stiffness,
            buckling_rate: Some(buckling_rate),
            stiffening_onset: Some(stiffening_onset),
            stiffening_rate: Some(stiffening_rate),
        }
    }

    /// Buckling under compression but no strain stiffening; the extension
    /// branch stays linear. Used as the reference state when quantifying
    /// stiffening.
    pub fn without_stiffening(stiffness: f64, buckling_rate: f64) -> Self {
        Self {
            stiffness,
            buckling_rate: Some(buckling_rate),
            stiffening_onset: None,
            stiffening_rate: None,
        }
    }

    fn linear(&self, strain: f64) -> MaterialResponse {
        MaterialResponse {
            energy: 0.5 * self.stiffness * strain * strain,
            slope: self.stiffness * strain,
            curvature: self.stiffness,
        }
    }
}

impl MaterialModel for SemiAffineFiberMaterial {
    fn evaluate(&self, strain: f64) -> MaterialResponse {
        let k = self.stiffness;
        if strain < 0.0 {
            let Some(d0) = self.buckling_rate else {
                return self.linear(strain);
            };
            let e = (strain / d0).exp();
            return MaterialResponse {
                energy: k * d0 * d0 * (e - 1.0) - k * d0 * strain,
                slope: k * d0 * (e - 1.0),
                curvature: k * e,
            };
        }

        match (self.stiffening_onset, self.stiffening_rate) {
            (Some(onset), Some(rate)) if strain >= onset => {
                let over = strain - onset;
                let e = (over / rate).exp();
                MaterialResponse {
                    energy: 0.5 * k * onset * onset
                        + k * onset * over
                        + k * rate * rate * (e - 1.0)
                        - k * rate * over,
                    slope: k * onset + k * rate * (e - 1.0),
                    curvature: k * e,
                }
            }
            _ => self.linear(strain),
        }
    }
}

/// Precomputed material table over strains in [-1, max_strain] with linear
/// spacing. Evaluation interpolates linearly between samples and clamps
/// out-of-range strains to the nearest endpoint.
#[derive(Debug, Clone)]
pub struct LookupTable {
    min_strain: f64,
    step: f64,
    energy: Vec<f64>,
    slope: Vec<f64>,
    curvature: Vec<f64>,
}

impl LookupTable {
    pub const DEFAULT_MAX_STRAIN: f64 = 4.0;
    pub const DEFAULT_STEP: f64 = 1e-4;

    /// Sample `model` over [-1, max_strain] with the given spacing.
    pub fn sample(model: &dyn MaterialModel, max_strain: f64, step: f64) -> Result<Self> {
        if !(step > 0.0) {
            return Err(SolverError::InvalidInput(format!(
                "lookup table step must be positive, got {step}"
            )));
        }
        if !(max_strain > -1.0) {
            return Err(SolverError::InvalidInput(format!(
                "lookup table upper strain must exceed -1, got {max_strain}"
            )));
        }

        let min_strain = -1.0;
        let samples = ((max_strain - min_strain) / step).ceil() as usize + 1;
        let mut energy = Vec::with_capacity(samples);
        let mut slope = Vec::with_capacity(samples);
        let mut curvature = Vec::with_capacity(samples);
        for i in 0..samples {
            let response = model.evaluate(min_strain + i as f64 * step);
            energy.push(response.energy);
            slope.push(response.slope);
            curvature.push(response.curvature);
        }

        Ok(Self {
            min_strain,
            step,
            energy,
            slope,
            curvature,
        })
    }

    fn max_strain(&self) -> f64 {
        self.min_strain + (self.energy.len() - 1) as f64 * self.step
    }
}

impl MaterialModel for LookupTable {
    fn evaluate(&self, strain: f64) -> MaterialResponse {
        let clamped = strain.clamp(self.min_strain, self.max_strain());
        let position = (clamped - self.min_strain) / self.step;
        let index = (position.floor() as usize).min(self.energy.len() - 2);
        let fraction = position - index as f64;

        let lerp = |table: &[f64]| table[index] + fraction * (table[index + 1] - table[index]);
        MaterialResponse {
            energy: lerp(&self.energy),
            slope: lerp(&self.slope),
            curvature: lerp(&self.curvature),
        }
    }
}
