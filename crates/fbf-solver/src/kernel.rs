//! Per-tetrahedron energy, force, and stiffness kernel.
//!
//! For one tetrahedron and the current corner displacements this computes,
//! by integrating the material response over the beam directions:
//!
//! - the stored elastic energy,
//! - the reaction force at each corner (the force that must be supplied to
//!   the node to hold the configuration),
//! - the 4x4 grid of 3x3 stiffness blocks coupling the corners, which is
//!   the derivative of the reaction forces with respect to the corner
//!   displacements.
//!
//! The computation streams over beams so no per-beam intermediate arrays
//! are materialized. Calls are independent across tetrahedra; the assembler
//! fans them out over worker threads.

use nalgebra::{Matrix3, Vector3};

use crate::material::MaterialModel;

/// Output of the kernel for a single tetrahedron.
#[derive(Debug, Clone)]
pub struct TetContribution {
    /// Elastic energy stored in the element.
    pub energy: f64,
    /// Reaction force at each corner.
    pub forces: [Vector3<f64>; 4],
    /// Stiffness block for each corner pair (m, r).
    pub blocks: [[Matrix3<f64>; 4]; 4],
}

/// Evaluate energy, corner forces, and stiffness blocks for one tetrahedron.
///
/// `phi` holds the rows of the element's shape tensor and
/// `corner_displacements` the displacements of its four corners in the same
/// order.
pub fn tetrahedron_response(
    phi: &[Vector3<f64>; 4],
    volume: f64,
    corner_displacements: &[Vector3<f64>; 4],
    beams: &[Vector3<f64>],
    material: &dyn MaterialModel,
) -> TetContribution {
    let weight = volume / beams.len() as f64;

    // Deformation gradient F = I + sum_m u_m (x) phi_m.
    let mut gradient = Matrix3::identity();
    for m in 0..4 {
        gradient += corner_displacements[m] * phi[m].transpose();
    }

    let mut energy = 0.0;
    let mut forces = [Vector3::zeros(); 4];
    let mut blocks = [[Matrix3::zeros(); 4]; 4];

    for beam in beams {
        let deformed = gradient * beam;
        let stretch = deformed.norm();
        let response = material.evaluate(stretch - 1.0);
        energy += response.energy;

        // First and second derivatives of the beam energy with respect to
        // the deformed beam vector. A vanishing stretch falls back to the
        // fully contracted limit.
        let (g, h) = if stretch > 0.0 {
            (
                -response.slope / stretch * weight,
                (stretch * response.curvature - response.slope) / (stretch * stretch * stretch)
                    * weight,
            )
        } else {
            (-material.evaluate(-1.0).slope * weight, 0.0)
        };

        let star = [
            phi[0].dot(beam),
            phi[1].dot(beam),
            phi[2].dot(beam),
            phi[3].dot(beam),
        ];

        // Symmetrized second derivative shared by all corner pairs.
        let pair = 0.5 * h * (deformed * deformed.transpose())
            - 0.5 * g * Matrix3::identity();

        for m in 0..4 {
            forces[m] -= star[m] * g * deformed;
            for r in 0..4 {
                blocks[m][r] += star[m] * star[r] * pair;
            }
        }
    }

    TetContribution {
        energy: energy * weight,
        forces,
        blocks,
    }
}
