//! File I/O for the fiber-network solver: whitespace-table loaders for
//! nodes, tetrahedra, beams, and boundary conditions, and writers for the
//! persisted solver outputs.

pub mod error;
pub mod read;
pub mod write;

pub use error::{IoError, Result};
pub use read::{
    BoundaryConditionTable, load_beams, load_boundary_conditions, load_coordinates,
    load_displacements, load_tetrahedra,
};
pub use write::{write_scalar_pairs, write_vector_table};
