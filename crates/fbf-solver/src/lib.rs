//! Quasi-static equilibrium solver for tetrahedral meshes embedded in a
//! non-linear, strain-stiffening fiber material.
//!
//! The deformation of each tetrahedron is projected onto a set of unit
//! directions (beams); a scalar material law evaluated along every beam
//! yields the element energy, the nodal reaction forces, and per-node-pair
//! stiffness blocks. The global stiffness is kept matrix-free as one 3x3
//! block per connection, and a Newton-type outer loop with a conjugate
//! gradient inner solve drives the free nodes either towards prescribed
//! external forces (`relax`) or towards prescribed target displacements
//! (`regularize`).

pub mod assembly;
pub mod beams;
pub mod cg;
pub mod error;
pub mod kernel;
pub mod material;
pub mod mesh;
pub mod model;
pub mod reports;
pub mod shape;

pub use assembly::{Connectivity, GlobalSystem};
pub use beams::{build_beams, validate_beams};
pub use cg::CgSolution;
pub use error::{Result, SolverError};
pub use kernel::{TetContribution, tetrahedron_response};
pub use material::{
    LinearSpring, LookupTable, MaterialModel, MaterialResponse, SemiAffineFiberMaterial,
};
pub use mesh::Mesh;
pub use model::{
    ConvergenceStatus, FiberModel, IterationRecord, RegularizeConfig, RelaxConfig,
    RelaxationReport,
};
pub use reports::{
    ForceMoments, PrincipalDirections, force_densities, force_moments,
    principal_fiber_directions, stiffening_ratio,
};
pub use shape::ShapeTensors;
