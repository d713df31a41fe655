//! Global assembly: connection tables, residual and stiffness scatter, and
//! the matrix-free stiffness operator.
//!
//! The global stiffness is never materialized as a matrix. It lives as one
//! 3x3 block per connection, where a connection is an ordered node pair
//! (i, j) with i free and some tetrahedron containing both. Applying the
//! operator walks the connections and accumulates block-vector products, so
//! the result is automatically restricted to the free rows.

use std::collections::BTreeMap;

use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;

use crate::error::{Result, SolverError};
use crate::kernel::{TetContribution, tetrahedron_response};
use crate::material::MaterialModel;
use crate::mesh::Mesh;
use crate::shape::ShapeTensors;

/// Slot marker for corner pairs whose row node is fixed; their stiffness
/// contribution is dropped at scatter time.
const NO_SLOT: usize = usize::MAX;

/// Precomputed connection tables for a mesh and free mask.
///
/// Connections are sorted ascending and deduplicated, so building twice
/// from the same inputs yields identical tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Connectivity {
    /// Ordered (i, j) node pairs with i free.
    pub connections: Vec<(usize, usize)>,
    /// Per tetrahedron, the connection slot of each corner pair (m, r),
    /// flattened as m * 4 + r.
    block_slots: Vec<[usize; 16]>,
    /// Contiguous connection ranges per row node: (node, start, end).
    row_ranges: Vec<(usize, usize, usize)>,
}

impl Connectivity {
    /// Scan every corner pair of every tetrahedron and build the connection
    /// list and scatter tables.
    pub fn build(tets: &[[usize; 4]], free: &[bool]) -> Self {
        let mut slots = BTreeMap::new();
        for tet in tets {
            for m in 0..4 {
                if !free[tet[m]] {
                    continue;
                }
                for r in 0..4 {
                    slots.insert((tet[m], tet[r]), 0usize);
                }
            }
        }
        for (slot, value) in slots.values_mut().enumerate() {
            *value = slot;
        }
        let connections: Vec<(usize, usize)> = slots.keys().copied().collect();

        let block_slots = tets
            .iter()
            .map(|tet| {
                let mut table = [NO_SLOT; 16];
                for m in 0..4 {
                    if !free[tet[m]] {
                        continue;
                    }
                    for r in 0..4 {
                        table[m * 4 + r] = slots[&(tet[m], tet[r])];
                    }
                }
                table
            })
            .collect();

        // Connections are sorted by row node first, so each row occupies a
        // contiguous range.
        let mut row_ranges = Vec::new();
        let mut start = 0;
        while start < connections.len() {
            let node = connections[start].0;
            let mut end = start + 1;
            while end < connections.len() && connections[end].0 == node {
                end += 1;
            }
            row_ranges.push((node, start, end));
            start = end;
        }

        Self {
            connections,
            block_slots,
            row_ranges,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// The assembled state of one outer iteration: nodal reaction forces, the
/// per-connection stiffness blocks, and the element energies.
#[derive(Debug, Clone)]
pub struct GlobalSystem {
    /// Reaction force on each node.
    pub forces: Vec<Vector3<f64>>,
    /// One stiffness block per connection, parallel to
    /// `Connectivity::connections`.
    pub blocks: Vec<Matrix3<f64>>,
    /// Elastic energy of each tetrahedron.
    pub energies: Vec<f64>,
    /// Total energy over tetrahedra with at least one free corner.
    pub total_energy: f64,
}

impl GlobalSystem {
    /// Run the element kernel over all tetrahedra in parallel and scatter
    /// the results. The scatter itself is a deterministic sequential pass
    /// over the precomputed tables, so repeated assembly of the same state
    /// is bit-identical.
    pub fn assemble(
        mesh: &Mesh,
        shape: &ShapeTensors,
        beams: &[Vector3<f64>],
        material: &dyn MaterialModel,
        free: &[bool],
        displacements: &[Vector3<f64>],
        topology: &Connectivity,
    ) -> Result<Self> {
        let contributions: Vec<TetContribution> = (0..mesh.tet_count())
            .into_par_iter()
            .map(|t| {
                let tet = mesh.tets[t];
                let corners = [
                    displacements[tet[0]],
                    displacements[tet[1]],
                    displacements[tet[2]],
                    displacements[tet[3]],
                ];
                tetrahedron_response(
                    &shape.rows[t],
                    shape.volumes[t],
                    &corners,
                    beams,
                    material,
                )
            })
            .collect();

        let mut forces = vec![Vector3::zeros(); mesh.node_count()];
        let mut blocks = vec![Matrix3::zeros(); topology.len()];
        let mut energies = vec![0.0; mesh.tet_count()];
        let mut total_energy = 0.0;

        for (t, contribution) in contributions.iter().enumerate() {
            let tet = mesh.tets[t];
            energies[t] = contribution.energy;
            if tet.iter().any(|&c| free[c]) {
                total_energy += contribution.energy;
            }
            for m in 0..4 {
                forces[tet[m]] += contribution.forces[m];
            }
            let table = &topology.block_slots[t];
            for m in 0..4 {
                for r in 0..4 {
                    let slot = table[m * 4 + r];
                    if slot != NO_SLOT {
                        blocks[slot] += contribution.blocks[m][r];
                    }
                }
            }
        }

        let system = Self {
            forces,
            blocks,
            energies,
            total_energy,
        };
        system.check_finite()?;
        Ok(system)
    }

    fn check_finite(&self) -> Result<()> {
        if let Some(t) = self.energies.iter().position(|e| !e.is_finite()) {
            return Err(SolverError::NumericFailure {
                quantity: "energy",
                index: t,
            });
        }
        if let Some(c) = self
            .forces
            .iter()
            .position(|f| !(f.x.is_finite() && f.y.is_finite() && f.z.is_finite()))
        {
            return Err(SolverError::NumericFailure {
                quantity: "force",
                index: c,
            });
        }
        Ok(())
    }

    /// Matrix-free operator application: output = K * input.
    ///
    /// Rows are processed in parallel; each row's connections are
    /// contiguous, so no two tasks write the same entry. Rows of fixed
    /// nodes have no connections and stay zero.
    pub fn apply(
        &self,
        topology: &Connectivity,
        input: &[Vector3<f64>],
        output: &mut [Vector3<f64>],
    ) {
        for entry in output.iter_mut() {
            *entry = Vector3::zeros();
        }
        let sums: Vec<(usize, Vector3<f64>)> = topology
            .row_ranges
            .par_iter()
            .map(|&(node, start, end)| {
                let mut accumulated = Vector3::zeros();
                for slot in start..end {
                    let (_, j) = topology.connections[slot];
                    accumulated += self.blocks[slot] * input[j];
                }
                (node, accumulated)
            })
            .collect();
        for (node, value) in sums {
            output[node] = value;
        }
    }

    /// The quadratic form u . K u, used by the stiffening report.
    pub fn coupling_energy(&self, topology: &Connectivity, input: &[Vector3<f64>]) -> f64 {
        let mut product = vec![Vector3::zeros(); input.len()];
        self.apply(topology, input, &mut product);
        input
            .iter()
            .zip(&product)
            .map(|(u, ku)| u.dot(ku))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beams::build_beams;
    use crate::material::LinearSpring;

    fn two_tet_mesh() -> Mesh {
        Mesh {
            nodes: vec![
                Vector3::zeros(),
                Vector3::x(),
                Vector3::y(),
                Vector3::z(),
                Vector3::new(1.0, 1.0, 1.0),
            ],
            tets: vec![[0, 1, 2, 3], [1, 2, 3, 4]],
        }
    }

    #[test]
    fn connections_are_deduplicated_and_sorted() {
        let mesh = two_tet_mesh();
        let free = vec![true; 5];
        let topology = Connectivity::build(&mesh.tets, &free);

        // Shared corners 1, 2, 3 appear in both tetrahedra but each pair
        // only once.
        let mut seen = std::collections::HashSet::new();
        for &pair in &topology.connections {
            assert!(seen.insert(pair), "duplicate connection {pair:?}");
        }
        let mut sorted = topology.connections.clone();
        sorted.sort();
        assert_eq!(sorted, topology.connections);
        // 16 pairs per tetrahedron, 9 shared among corners 1, 2, 3.
        assert_eq!(topology.len(), 23);
        assert!(topology.connections.contains(&(1, 4)));
        assert!(!topology.connections.contains(&(0, 4)));
    }

    #[test]
    fn rebuilding_yields_identical_tables() {
        let mesh = two_tet_mesh();
        let free = vec![true, false, true, true, true];
        let a = Connectivity::build(&mesh.tets, &free);
        let b = Connectivity::build(&mesh.tets, &free);
        assert_eq!(a, b);
    }

    #[test]
    fn fixed_rows_have_no_connections() {
        let mesh = two_tet_mesh();
        let free = vec![false, true, true, true, false];
        let topology = Connectivity::build(&mesh.tets, &free);
        for &(i, _) in &topology.connections {
            assert!(free[i]);
        }
    }

    #[test]
    fn zero_displacement_assembles_a_quiet_state() {
        let mesh = two_tet_mesh();
        let shape = ShapeTensors::compute(&mesh).unwrap();
        let beams = build_beams(40);
        let material = LinearSpring { stiffness: 10.0 };
        let free = vec![true; 5];
        let topology = Connectivity::build(&mesh.tets, &free);
        let displacements = vec![Vector3::zeros(); 5];

        let system = GlobalSystem::assemble(
            &mesh,
            &shape,
            &beams,
            &material,
            &free,
            &displacements,
            &topology,
        )
        .unwrap();

        assert!(system.total_energy.abs() < 1e-12);
        for force in &system.forces {
            assert!(force.norm() < 1e-12);
        }
    }

    #[test]
    fn operator_matches_densely_accumulated_blocks() {
        let mesh = two_tet_mesh();
        let shape = ShapeTensors::compute(&mesh).unwrap();
        let beams = build_beams(40);
        let material = LinearSpring { stiffness: 10.0 };
        let free = vec![true, true, false, true, true];
        let topology = Connectivity::build(&mesh.tets, &free);
        let mut displacements = vec![Vector3::zeros(); 5];
        displacements[4] = Vector3::new(0.01, -0.02, 0.005);

        let system = GlobalSystem::assemble(
            &mesh,
            &shape,
            &beams,
            &material,
            &free,
            &displacements,
            &topology,
        )
        .unwrap();

        // Accumulate the same blocks densely, straight from the kernel.
        let n = mesh.node_count();
        let mut dense = vec![vec![Matrix3::<f64>::zeros(); n]; n];
        for (t, tet) in mesh.tets.iter().enumerate() {
            let corners = [
                displacements[tet[0]],
                displacements[tet[1]],
                displacements[tet[2]],
                displacements[tet[3]],
            ];
            let contribution = tetrahedron_response(
                &shape.rows[t],
                shape.volumes[t],
                &corners,
                &beams,
                &material,
            );
            for m in 0..4 {
                for r in 0..4 {
                    dense[tet[m]][tet[r]] += contribution.blocks[m][r];
                }
            }
        }

        // K applied to an arbitrary vector agrees with the dense row sums
        // on the free rows.
        let probe: Vec<Vector3<f64>> = (0..n)
            .map(|c| Vector3::new(c as f64 + 0.5, -(c as f64), 0.25 * c as f64))
            .collect();
        let mut output = vec![Vector3::zeros(); n];
        system.apply(&topology, &probe, &mut output);

        for i in 0..n {
            let expected = if free[i] {
                (0..n).fold(Vector3::zeros(), |acc, j| acc + dense[i][j] * probe[j])
            } else {
                Vector3::zeros()
            };
            assert!(
                (output[i] - expected).norm() < 1e-10,
                "row {i} mismatch: {:?} vs {:?}",
                output[i],
                expected
            );
        }
    }

    #[test]
    fn fixed_tetrahedra_are_excluded_from_the_total_energy() {
        let mesh = two_tet_mesh();
        let shape = ShapeTensors::compute(&mesh).unwrap();
        let beams = build_beams(40);
        let material = LinearSpring { stiffness: 10.0 };
        // Every corner of tet 0 fixed, node 4 free.
        let free = vec![false, false, false, false, true];
        let topology = Connectivity::build(&mesh.tets, &free);
        let mut displacements = vec![Vector3::zeros(); 5];
        displacements[0] = Vector3::new(0.01, 0.0, 0.0);

        let system = GlobalSystem::assemble(
            &mesh,
            &shape,
            &beams,
            &material,
            &free,
            &displacements,
            &topology,
        )
        .unwrap();

        // Tet 0 stores energy but only tet 1 counts globally.
        assert!(system.energies[0] > 0.0);
        assert!((system.total_energy - system.energies[1]).abs() < 1e-15);
    }
}
