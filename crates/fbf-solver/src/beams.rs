//! The beam quadrature set: unit direction vectors used to integrate the
//! directional strain-energy density over the sphere.

use nalgebra::Vector3;
use std::f64::consts::PI;

use crate::error::{Result, SolverError};

/// Build `n` unit vectors covering the sphere near-uniformly.
///
/// Uses the deterministic golden-angle spiral, so the same `n` always yields
/// the same set.
pub fn build_beams(n: usize) -> Vec<Vector3<f64>> {
    let golden = PI * (3.0 - 5.0_f64.sqrt());
    (0..n)
        .map(|k| {
            let z = 1.0 - 2.0 * (k as f64 + 0.5) / n as f64;
            let radius = (1.0 - z * z).sqrt();
            let azimuth = golden * k as f64;
            Vector3::new(radius * azimuth.cos(), radius * azimuth.sin(), z)
        })
        .collect()
}

/// Check that a user-supplied beam set is non-empty and consists of unit
/// vectors.
pub fn validate_beams(beams: &[Vector3<f64>]) -> Result<()> {
    if beams.is_empty() {
        return Err(SolverError::InvalidInput(
            "the beam set must contain at least one direction".into(),
        ));
    }
    for (b, beam) in beams.iter().enumerate() {
        if (beam.norm() - 1.0).abs() > 1e-8 {
            return Err(SolverError::InvalidInput(format!(
                "beam {b} has norm {:.6}, expected a unit vector",
                beam.norm()
            )));
        }
    }
    Ok(())
}
