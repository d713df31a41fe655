//! The model facade and the quasi-static equilibrium drivers.
//!
//! A `FiberModel` owns the mesh, the boundary data, the beam set, the
//! material, and the derived state, built up in explicit phases:
//! `set_nodes`, then `set_tetrahedra` (shape tensors are computed here and
//! degenerate elements are fatal), then `set_boundary_condition` (which
//! recomputes the connection tables). `relax` balances prescribed external
//! forces; `regularize` pulls the free nodes towards prescribed target
//! displacements through a Tikhonov-damped step. Both share the outer
//! Newton loop and the sliding-window energy-stability termination.

use log::{info, warn};
use nalgebra::Vector3;
use serde::Serialize;

use crate::assembly::{Connectivity, GlobalSystem};
use crate::beams::{build_beams, validate_beams};
use crate::cg;
use crate::error::{Result, SolverError};
use crate::material::MaterialModel;
use crate::mesh::Mesh;
use crate::shape::ShapeTensors;

/// Parameters of the force-balancing driver.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RelaxConfig {
    /// Fraction of each computed displacement increment that is applied.
    pub stepper: f64,
    /// Hard cap on outer iterations.
    pub max_iterations: usize,
    /// Relative energy-stability threshold for termination.
    pub rel_stability: f64,
    /// Relative residual tolerance of the inner conjugate gradient.
    pub cg_tolerance: f64,
}

impl Default for RelaxConfig {
    fn default() -> Self {
        Self {
            stepper: 0.066,
            max_iterations: 300,
            rel_stability: 0.01,
            cg_tolerance: 1e-5,
        }
    }
}

/// Parameters of the target-displacement driver.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegularizeConfig {
    pub stepper: f64,
    /// Tikhonov shift added to the stiffness operator.
    pub alpha: f64,
    pub max_iterations: usize,
    pub rel_stability: f64,
    pub cg_tolerance: f64,
}

impl Default for RegularizeConfig {
    fn default() -> Self {
        Self {
            stepper: 0.1,
            alpha: 1e-3,
            max_iterations: 300,
            rel_stability: 0.01,
            cg_tolerance: 1e-5,
        }
    }
}

/// How an outer solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConvergenceStatus {
    /// The energy-stability test fired.
    Converged,
    /// The iteration cap was reached first; the last iterate is returned.
    IterationLimit,
}

/// One entry of the outer iteration history.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IterationRecord {
    /// Total energy over tetrahedra with a free corner.
    pub total_energy: f64,
    /// Squared norm of the current driving residual on the free rows.
    pub residual: f64,
    /// Squared norm of the applied displacement step.
    pub step_norm: f64,
}

/// Summary of an outer solve.
#[derive(Debug, Clone, Serialize)]
pub struct RelaxationReport {
    pub iterations: usize,
    pub total_energy: f64,
    pub residual: f64,
    pub status: ConvergenceStatus,
    /// One record per outer iteration, preceded by the initial state.
    pub history: Vec<IterationRecord>,
}

enum DriveMode<'a> {
    Relax {
        external: &'a [Vector3<f64>],
    },
    Regularize {
        targets: &'a [Vector3<f64>],
        alpha: f64,
    },
}

/// A tetrahedral mesh embedded in a fiber material, with boundary data and
/// the assembled state of the last solve.
pub struct FiberModel {
    mesh: Mesh,
    free: Vec<bool>,
    displacements: Vec<Vector3<f64>>,
    external_forces: Vec<Vector3<f64>>,
    target_displacements: Option<Vec<Vector3<f64>>>,
    beams: Vec<Vector3<f64>>,
    material: Option<Box<dyn MaterialModel>>,
    shape: Option<ShapeTensors>,
    topology: Option<Connectivity>,
    system: Option<GlobalSystem>,
}

impl Default for FiberModel {
    fn default() -> Self {
        Self::new()
    }
}

impl FiberModel {
    pub fn new() -> Self {
        Self {
            mesh: Mesh::default(),
            free: Vec::new(),
            displacements: Vec::new(),
            external_forces: Vec::new(),
            target_displacements: None,
            beams: Vec::new(),
            material: None,
            shape: None,
            topology: None,
            system: None,
        }
    }

    /// Store the node coordinates and reset all per-node state: zero
    /// displacements, zero external forces, every node free.
    pub fn set_nodes(&mut self, nodes: Vec<Vector3<f64>>) -> Result<()> {
        if nodes.is_empty() {
            return Err(SolverError::InvalidInput(
                "the mesh needs at least one node".into(),
            ));
        }
        let count = nodes.len();
        self.mesh.nodes = nodes;
        self.mesh.tets.clear();
        self.free = vec![true; count];
        self.displacements = vec![Vector3::zeros(); count];
        self.external_forces = vec![Vector3::zeros(); count];
        self.target_displacements = None;
        self.shape = None;
        self.topology = None;
        self.system = None;
        Ok(())
    }

    /// Store the element table and precompute volumes and shape tensors.
    /// A zero-volume tetrahedron is fatal here, naming the element.
    pub fn set_tetrahedra(&mut self, tets: Vec<[usize; 4]>) -> Result<()> {
        self.mesh.tets = tets;
        self.mesh.validate()?;
        self.shape = Some(ShapeTensors::compute(&self.mesh)?);
        self.topology = None;
        self.system = None;
        Ok(())
    }

    /// Use a caller-supplied beam quadrature set.
    pub fn set_beams(&mut self, beams: Vec<Vector3<f64>>) -> Result<()> {
        validate_beams(&beams)?;
        self.beams = beams;
        Ok(())
    }

    /// Generate `n` beam directions covering the sphere.
    pub fn compute_beams(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(SolverError::InvalidInput(
                "the beam count must be positive".into(),
            ));
        }
        self.beams = build_beams(n);
        Ok(())
    }

    pub fn set_material_model(&mut self, material: Box<dyn MaterialModel>) {
        self.material = Some(material);
        self.system = None;
    }

    /// Apply per-node boundary conditions.
    ///
    /// A node whose prescribed displacement is finite is fixed there; a node
    /// whose prescribed displacement is NaN stays free and receives the
    /// matching entry of `external` as applied load. Entries of `external`
    /// on fixed nodes are ignored. Mixing finite and NaN components within
    /// one node is rejected.
    pub fn set_boundary_condition(
        &mut self,
        prescribed: &[Vector3<f64>],
        external: &[Vector3<f64>],
    ) -> Result<()> {
        let count = self.mesh.node_count();
        if prescribed.len() != count || external.len() != count {
            return Err(SolverError::InvalidInput(format!(
                "boundary conditions need one row per node: got {} and {} rows for {count} nodes",
                prescribed.len(),
                external.len()
            )));
        }

        for c in 0..count {
            let finite = prescribed[c].iter().filter(|v| v.is_finite()).count();
            match finite {
                3 => {
                    self.free[c] = false;
                    self.displacements[c] = prescribed[c];
                    self.external_forces[c] = Vector3::zeros();
                }
                0 => {
                    self.free[c] = true;
                    if !external[c].iter().all(|v| v.is_finite()) {
                        return Err(SolverError::InvalidInput(format!(
                            "free node {c} needs a finite external force"
                        )));
                    }
                    self.external_forces[c] = external[c];
                }
                _ => {
                    return Err(SolverError::InvalidInput(format!(
                        "node {c} mixes finite and NaN components in its prescribed displacement"
                    )));
                }
            }
        }

        self.compute_connections()
    }

    /// Target displacements for the regularize driver. Every entry must be
    /// finite.
    pub fn set_target_displacements(&mut self, targets: Vec<Vector3<f64>>) -> Result<()> {
        if targets.len() != self.mesh.node_count() {
            return Err(SolverError::InvalidInput(format!(
                "target displacements need one row per node: got {} rows for {} nodes",
                targets.len(),
                self.mesh.node_count()
            )));
        }
        if let Some(c) = targets
            .iter()
            .position(|t| !t.iter().all(|v| v.is_finite()))
        {
            return Err(SolverError::InvalidInput(format!(
                "target displacement of node {c} is not finite"
            )));
        }
        self.target_displacements = Some(targets);
        Ok(())
    }

    /// Rebuild the connection tables from the element table and the current
    /// free mask. Idempotent.
    pub fn compute_connections(&mut self) -> Result<()> {
        if self.mesh.tets.is_empty() {
            return Err(SolverError::InvalidInput(
                "no tetrahedra loaded, nothing to connect".into(),
            ));
        }
        self.topology = Some(Connectivity::build(&self.mesh.tets, &self.free));
        Ok(())
    }

    /// Assemble forces, stiffness, and energies for the current
    /// displacements without stepping, making the accessors valid.
    pub fn update_state(&mut self) -> Result<()> {
        if self.topology.is_none() {
            self.compute_connections()?;
        }
        let system = self.assembled_system()?;
        self.system = Some(system);
        Ok(())
    }

    /// Balance the prescribed external forces on the free nodes.
    pub fn relax(&mut self, config: &RelaxConfig) -> Result<RelaxationReport> {
        if self.topology.is_none() {
            self.compute_connections()?;
        }
        let material = self
            .material
            .as_deref()
            .ok_or_else(|| SolverError::InvalidInput("no material model set".into()))?;
        let shape = self
            .shape
            .as_ref()
            .ok_or_else(|| SolverError::InvalidInput("no tetrahedra loaded".into()))?;
        let topology = self
            .topology
            .as_ref()
            .ok_or_else(|| SolverError::InvalidInput("no connection tables".into()))?;
        validate_beams(&self.beams)?;

        let (system, report) = drive(
            &self.mesh,
            shape,
            &self.beams,
            material,
            topology,
            &self.free,
            &mut self.displacements,
            DriveMode::Relax {
                external: &self.external_forces,
            },
            config.stepper,
            config.max_iterations,
            config.rel_stability,
            config.cg_tolerance,
        )?;
        self.system = Some(system);
        Ok(report)
    }

    /// Pull the free nodes towards the target displacements, estimating the
    /// forces that would produce them.
    pub fn regularize(&mut self, config: &RegularizeConfig) -> Result<RelaxationReport> {
        if self.topology.is_none() {
            self.compute_connections()?;
        }
        let targets = self
            .target_displacements
            .as_deref()
            .ok_or_else(|| SolverError::InvalidInput("no target displacements set".into()))?;
        let material = self
            .material
            .as_deref()
            .ok_or_else(|| SolverError::InvalidInput("no material model set".into()))?;
        let shape = self
            .shape
            .as_ref()
            .ok_or_else(|| SolverError::InvalidInput("no tetrahedra loaded".into()))?;
        let topology = self
            .topology
            .as_ref()
            .ok_or_else(|| SolverError::InvalidInput("no connection tables".into()))?;
        validate_beams(&self.beams)?;

        let (system, report) = drive(
            &self.mesh,
            shape,
            &self.beams,
            material,
            topology,
            &self.free,
            &mut self.displacements,
            DriveMode::Regularize {
                targets,
                alpha: config.alpha,
            },
            config.stepper,
            config.max_iterations,
            config.rel_stability,
            config.cg_tolerance,
        )?;
        self.system = Some(system);
        Ok(report)
    }

    pub fn nodes(&self) -> &[Vector3<f64>] {
        &self.mesh.nodes
    }

    pub fn tetrahedra(&self) -> &[[usize; 4]] {
        &self.mesh.tets
    }

    pub fn displacements(&self) -> &[Vector3<f64>] {
        &self.displacements
    }

    pub fn free_nodes(&self) -> &[bool] {
        &self.free
    }

    /// Reaction forces of the last assembled state.
    pub fn forces(&self) -> Option<&[Vector3<f64>]> {
        self.system.as_ref().map(|s| s.forces.as_slice())
    }

    /// Per-tetrahedron energies of the last assembled state.
    pub fn energies(&self) -> Option<&[f64]> {
        self.system.as_ref().map(|s| s.energies.as_slice())
    }

    pub fn total_energy(&self) -> Option<f64> {
        self.system.as_ref().map(|s| s.total_energy)
    }

    /// Per-tetrahedron volumes, available once tetrahedra are loaded.
    pub fn volumes(&self) -> Option<&[f64]> {
        self.shape.as_ref().map(|s| s.volumes.as_slice())
    }

    pub fn connections(&self) -> Option<&[(usize, usize)]> {
        self.topology.as_ref().map(|t| t.connections.as_slice())
    }

    pub fn centroids(&self) -> Vec<Vector3<f64>> {
        self.mesh.centroids()
    }

    pub(crate) fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub(crate) fn topology(&self) -> Option<&Connectivity> {
        self.topology.as_ref()
    }

    pub(crate) fn shape(&self) -> Option<&ShapeTensors> {
        self.shape.as_ref()
    }

    pub(crate) fn system(&self) -> Option<&GlobalSystem> {
        self.system.as_ref()
    }

    pub(crate) fn beams(&self) -> &[Vector3<f64>] {
        &self.beams
    }

    fn assembled_system(&self) -> Result<GlobalSystem> {
        let material = self
            .material
            .as_deref()
            .ok_or_else(|| SolverError::InvalidInput("no material model set".into()))?;
        self.assembled_system_with(material)
    }

    /// Assemble the current displacements against an arbitrary material,
    /// leaving the stored state untouched. The stiffening report uses this
    /// to compare against a reference material.
    pub(crate) fn assembled_system_with(
        &self,
        material: &dyn MaterialModel,
    ) -> Result<GlobalSystem> {
        let shape = self
            .shape
            .as_ref()
            .ok_or_else(|| SolverError::InvalidInput("no tetrahedra loaded".into()))?;
        let topology = self
            .topology
            .as_ref()
            .ok_or_else(|| SolverError::InvalidInput("no connection tables".into()))?;
        validate_beams(&self.beams)?;
        GlobalSystem::assemble(
            &self.mesh,
            shape,
            &self.beams,
            material,
            &self.free,
            &self.displacements,
            topology,
        )
    }
}

/// Squared residual norm of the current state on the free rows.
fn residual_norm_squared(
    mode: &DriveMode,
    system: &GlobalSystem,
    topology: &Connectivity,
    free: &[bool],
    displacements: &[Vector3<f64>],
) -> f64 {
    match mode {
        DriveMode::Relax { external } => free
            .iter()
            .enumerate()
            .filter(|&(_, &is_free)| is_free)
            .map(|(c, _)| (external[c] - system.forces[c]).norm_squared())
            .sum(),
        DriveMode::Regularize { targets, .. } => {
            let difference: Vec<Vector3<f64>> = displacements
                .iter()
                .zip(*targets)
                .map(|(u, t)| t - u)
                .collect();
            let mut product = vec![Vector3::zeros(); displacements.len()];
            system.apply(topology, &difference, &mut product);
            product.iter().map(|v| v.norm_squared()).sum()
        }
    }
}

/// Right-hand side of the linearized step, zero on fixed rows.
fn right_hand_side(
    mode: &DriveMode,
    system: &GlobalSystem,
    topology: &Connectivity,
    free: &[bool],
    displacements: &[Vector3<f64>],
) -> Vec<Vector3<f64>> {
    match mode {
        DriveMode::Relax { external } => (0..displacements.len())
            .map(|c| {
                if free[c] {
                    external[c] - system.forces[c]
                } else {
                    Vector3::zeros()
                }
            })
            .collect(),
        DriveMode::Regularize { targets, .. } => {
            let difference: Vec<Vector3<f64>> = displacements
                .iter()
                .zip(*targets)
                .map(|(u, t)| t - u)
                .collect();
            let mut rhs = vec![Vector3::zeros(); displacements.len()];
            system.apply(topology, &difference, &mut rhs);
            rhs
        }
    }
}

/// Sliding-window energy-stability test over the last five recorded
/// energies.
fn energy_is_stable(history: &[IterationRecord], rel_stability: f64) -> bool {
    let window: Vec<f64> = history
        .iter()
        .rev()
        .take(5)
        .map(|record| record.total_energy)
        .collect();
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    if mean == 0.0 {
        return true;
    }
    let variance = window
        .iter()
        .map(|e| (e - mean) * (e - mean))
        .sum::<f64>()
        / window.len() as f64;
    let deviation = variance.sqrt() / (window.len() as f64).sqrt();
    deviation / mean < rel_stability
}

#[allow(clippy::too_many_arguments)]
fn drive(
    mesh: &Mesh,
    shape: &ShapeTensors,
    beams: &[Vector3<f64>],
    material: &dyn MaterialModel,
    topology: &Connectivity,
    free: &[bool],
    displacements: &mut [Vector3<f64>],
    mode: DriveMode,
    stepper: f64,
    max_iterations: usize,
    rel_stability: f64,
    cg_tolerance: f64,
) -> Result<(GlobalSystem, RelaxationReport)> {
    let assemble = |displacements: &[Vector3<f64>]| {
        GlobalSystem::assemble(mesh, shape, beams, material, free, displacements, topology)
    };

    let mut system = assemble(displacements)?;
    let mut history = vec![IterationRecord {
        total_energy: system.total_energy,
        residual: residual_norm_squared(&mode, &system, topology, free, displacements),
        step_norm: 0.0,
    }];
    let mut status = ConvergenceStatus::IterationLimit;
    let mut performed = 0;

    let alpha = match &mode {
        DriveMode::Regularize { alpha, .. } => *alpha,
        DriveMode::Relax { .. } => 0.0,
    };

    for iteration in 0..max_iterations {
        let rhs = right_hand_side(&mode, &system, topology, free, displacements);
        let solution = cg::solve(
            |input, output| {
                system.apply(topology, input, output);
                if alpha > 0.0 {
                    for (c, &is_free) in free.iter().enumerate() {
                        if is_free {
                            output[c] += alpha * input[c];
                        }
                    }
                }
            },
            &rhs,
            cg_tolerance,
        );

        let mut step_norm = 0.0;
        for (c, &is_free) in free.iter().enumerate() {
            if is_free {
                let step = stepper * solution.increment[c];
                displacements[c] += step;
                step_norm += step.norm_squared();
            }
        }
        if let Some(c) = displacements
            .iter()
            .position(|u| !u.iter().all(|v| v.is_finite()))
        {
            return Err(SolverError::NumericFailure {
                quantity: "displacement",
                index: c,
            });
        }

        system = assemble(displacements)?;
        let record = IterationRecord {
            total_energy: system.total_energy,
            residual: residual_norm_squared(&mode, &system, topology, free, displacements),
            step_norm,
        };
        info!(
            "outer iteration {iteration}: energy {:.6e}, residual {:.6e}, step {:.6e}",
            record.total_energy, record.residual, record.step_norm
        );
        history.push(record);
        performed = iteration + 1;

        if history.len() > 6 && energy_is_stable(&history, rel_stability) {
            status = ConvergenceStatus::Converged;
            break;
        }
    }

    if status == ConvergenceStatus::IterationLimit {
        warn!(
            "outer loop stopped at the iteration cap of {max_iterations} without a stable energy"
        );
    }

    let last = history[history.len() - 1];
    let report = RelaxationReport {
        iterations: performed,
        total_energy: last.total_energy,
        residual: last.residual,
        status,
        history,
    };
    Ok((system, report))
}
