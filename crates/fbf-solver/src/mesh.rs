//! Tetrahedral mesh data: node coordinates and element connectivity.

use nalgebra::Vector3;

use crate::error::{Result, SolverError};

/// A tetrahedral mesh: node positions and the four corner indices of each
/// element. Indices are dense and 0-based; file loaders convert from the
/// 1-based text format before data reaches this struct.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// Node coordinates, one entry per node.
    pub nodes: Vec<Vector3<f64>>,
    /// Corner node indices of each tetrahedron.
    pub tets: Vec<[usize; 4]>,
}

impl Mesh {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn tet_count(&self) -> usize {
        self.tets.len()
    }

    /// Check that every tetrahedron references valid, distinct nodes.
    pub fn validate(&self) -> Result<()> {
        for (t, tet) in self.tets.iter().enumerate() {
            for &c in tet {
                if c >= self.nodes.len() {
                    return Err(SolverError::InvalidInput(format!(
                        "tetrahedron {t} references node {c} but only {} nodes are loaded",
                        self.nodes.len()
                    )));
                }
            }
            for m in 0..4 {
                for r in m + 1..4 {
                    if tet[m] == tet[r] {
                        return Err(SolverError::InvalidInput(format!(
                            "tetrahedron {t} repeats node {}",
                            tet[m]
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Centroid of each tetrahedron.
    pub fn centroids(&self) -> Vec<Vector3<f64>> {
        self.tets
            .iter()
            .map(|tet| tet.iter().map(|&c| self.nodes[c]).sum::<Vector3<f64>>() / 4.0)
            .collect()
    }
}
