//! Loaders for the whitespace-separated table formats: node coordinates,
//! tetrahedra, beam directions, boundary conditions, and displacement
//! fields. One record per line; blank lines and lines starting with `#`
//! are skipped.

use std::fs;
use std::path::Path;

use nalgebra::Vector3;

use crate::error::{IoError, Result};

/// Per-node boundary data as loaded from a bcond table.
///
/// Free nodes carry NaN prescribed displacements and a finite external
/// force; fixed nodes carry a finite prescribed displacement and a zero
/// force entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryConditionTable {
    pub prescribed_displacements: Vec<Vector3<f64>>,
    pub external_forces: Vec<Vector3<f64>>,
}

fn data_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim().to_string()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .collect())
}

fn parse_floats(path: &Path, line: usize, text: &str, columns: usize) -> Result<Vec<f64>> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != columns {
        return Err(IoError::parse(
            path,
            line,
            format!("expected {columns} columns, found {}", fields.len()),
        ));
    }
    fields
        .iter()
        .map(|field| {
            field.parse::<f64>().map_err(|_| {
                IoError::parse(path, line, format!("not a number: {field:?}"))
            })
        })
        .collect()
}

/// Load node coordinates: three floats per line.
pub fn load_coordinates(path: impl AsRef<Path>) -> Result<Vec<Vector3<f64>>> {
    let path = path.as_ref();
    let mut nodes = Vec::new();
    for (line, text) in data_lines(path)? {
        let values = parse_floats(path, line, &text, 3)?;
        nodes.push(Vector3::new(values[0], values[1], values[2]));
    }
    if nodes.is_empty() {
        return Err(IoError::InvalidData(format!(
            "{} contains no coordinates",
            path.display()
        )));
    }
    Ok(nodes)
}

/// Load tetrahedra: four one-based node indices per line, converted to
/// zero-based.
pub fn load_tetrahedra(path: impl AsRef<Path>) -> Result<Vec<[usize; 4]>> {
    let path = path.as_ref();
    let mut tets = Vec::new();
    for (line, text) in data_lines(path)? {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(IoError::parse(
                path,
                line,
                format!("expected 4 corner indices, found {}", fields.len()),
            ));
        }
        let mut tet = [0usize; 4];
        for (slot, field) in tet.iter_mut().zip(&fields) {
            let index: usize = field.parse().map_err(|_| {
                IoError::parse(path, line, format!("not an index: {field:?}"))
            })?;
            if index == 0 {
                return Err(IoError::parse(path, line, "corner indices are one-based"));
            }
            *slot = index - 1;
        }
        tets.push(tet);
    }
    if tets.is_empty() {
        return Err(IoError::InvalidData(format!(
            "{} contains no tetrahedra",
            path.display()
        )));
    }
    Ok(tets)
}

/// Load beam directions: three floats per line, each row a unit vector.
pub fn load_beams(path: impl AsRef<Path>) -> Result<Vec<Vector3<f64>>> {
    let path = path.as_ref();
    let mut beams = Vec::new();
    for (line, text) in data_lines(path)? {
        let values = parse_floats(path, line, &text, 3)?;
        let beam = Vector3::new(values[0], values[1], values[2]);
        if (beam.norm() - 1.0).abs() > 1e-6 {
            return Err(IoError::parse(
                path,
                line,
                format!("beam has norm {:.6}, expected a unit vector", beam.norm()),
            ));
        }
        beams.push(beam);
    }
    if beams.is_empty() {
        return Err(IoError::InvalidData(format!(
            "{} contains no beams",
            path.display()
        )));
    }
    Ok(beams)
}

/// Load a boundary condition table: four floats per line. A last column of
/// 1 marks a free node whose first three values are the external force; a
/// last column of 0 marks a fixed node whose first three values are the
/// prescribed displacement.
pub fn load_boundary_conditions(path: impl AsRef<Path>) -> Result<BoundaryConditionTable> {
    let path = path.as_ref();
    let mut prescribed = Vec::new();
    let mut external = Vec::new();
    for (line, text) in data_lines(path)? {
        let values = parse_floats(path, line, &text, 4)?;
        let row = Vector3::new(values[0], values[1], values[2]);
        if values[3] > 0.5 {
            prescribed.push(Vector3::new(f64::NAN, f64::NAN, f64::NAN));
            external.push(row);
        } else {
            prescribed.push(row);
            external.push(Vector3::zeros());
        }
    }
    if prescribed.is_empty() {
        return Err(IoError::InvalidData(format!(
            "{} contains no boundary conditions",
            path.display()
        )));
    }
    Ok(BoundaryConditionTable {
        prescribed_displacements: prescribed,
        external_forces: external,
    })
}

/// Load a displacement field: three floats per line, one row per node.
pub fn load_displacements(path: impl AsRef<Path>) -> Result<Vec<Vector3<f64>>> {
    load_coordinates(path)
}
