//! Per-tetrahedron shape tensors and volumes.
//!
//! The shape tensor of a tetrahedron maps its four corner displacements to
//! the element's displacement gradient: F_ij = delta_ij + sum_m u_mi Phi_mj.
//! It is computed once from the reference coordinates as Chi * B^-1, where
//! the columns of B span the tetrahedron edges from corner 0 and Chi is the
//! constant 4x3 matrix with rows (-1,-1,-1), (1,0,0), (0,1,0), (0,0,1).

use nalgebra::{Matrix3, Vector3};

use crate::error::{Result, SolverError};
use crate::mesh::Mesh;

/// Shape tensors and volumes of every tetrahedron, computed once after the
/// mesh is loaded.
#[derive(Debug, Clone)]
pub struct ShapeTensors {
    /// The four rows of Phi per tetrahedron. Because the rows of Chi sum to
    /// zero, row 0 always equals -(row1 + row2 + row3).
    pub rows: Vec<[Vector3<f64>; 4]>,
    /// Volume of each tetrahedron, strictly positive.
    pub volumes: Vec<f64>,
}

impl ShapeTensors {
    /// Compute volumes and shape tensors for every tetrahedron of the mesh.
    ///
    /// A tetrahedron whose corners span no volume is a fatal error naming
    /// the offending element.
    pub fn compute(mesh: &Mesh) -> Result<Self> {
        let mut rows = Vec::with_capacity(mesh.tet_count());
        let mut volumes = Vec::with_capacity(mesh.tet_count());

        for (t, tet) in mesh.tets.iter().enumerate() {
            let origin = mesh.nodes[tet[0]];
            let b = Matrix3::from_columns(&[
                mesh.nodes[tet[1]] - origin,
                mesh.nodes[tet[2]] - origin,
                mesh.nodes[tet[3]] - origin,
            ]);

            let volume = b.determinant().abs() / 6.0;
            if volume == 0.0 {
                return Err(SolverError::DegenerateTetrahedron(t));
            }
            let inverse = b
                .try_inverse()
                .ok_or(SolverError::DegenerateTetrahedron(t))?;

            // Rows 1..3 of Chi pick out the rows of B^-1 directly.
            let r1: Vector3<f64> = inverse.row(0).transpose();
            let r2: Vector3<f64> = inverse.row(1).transpose();
            let r3: Vector3<f64> = inverse.row(2).transpose();
            rows.push([-(r1 + r2 + r3), r1, r2, r3]);
            volumes.push(volume);
        }

        Ok(Self { rows, volumes })
    }
}
