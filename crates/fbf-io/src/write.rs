//! Writers for the persisted solver outputs. All tables are whitespace
//! separated with one record per line, matching the loader formats.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;

use crate::error::Result;

/// Write a table of 3-vectors, one row per line in scientific notation.
/// Used for node positions, displacements, forces, force densities, beam
/// sets, and tetrahedron centroids.
pub fn write_vector_table(path: impl AsRef<Path>, rows: &[Vector3<f64>]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for row in rows {
        writeln!(out, "{:.9e} {:.9e} {:.9e}", row.x, row.y, row.z)?;
    }
    out.flush()?;
    Ok(())
}

/// Write paired scalars, one `(left, right)` pair per line. Used for the
/// per-tetrahedron energy and volume table.
pub fn write_scalar_pairs(path: impl AsRef<Path>, rows: &[(f64, f64)]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for (left, right) in rows {
        writeln!(out, "{left:.9e} {right:.9e}")?;
    }
    out.flush()?;
    Ok(())
}
