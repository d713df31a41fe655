//! Derived quantities reported after a solve: force moments around the
//! center of contractility, the stiffening ratio, principal fiber
//! directions, and nodal force densities.

use nalgebra::{Matrix3, Vector3};
use serde::Serialize;

use crate::beams::build_beams;
use crate::error::{Result, SolverError};
use crate::material::MaterialModel;
use crate::model::FiberModel;

/// Net force, center of contractility, and the principal force moments of
/// the nodes within a radius around the origin.
#[derive(Debug, Clone, Serialize)]
pub struct ForceMoments {
    /// Sum of the reaction forces over the selected nodes.
    pub force_sum: Vector3<f64>,
    /// Center of contractility: the point the force lines pass closest to.
    pub center: Vector3<f64>,
    /// Summed radial component of the nodal forces around the center.
    pub contractility: f64,
    /// Largest force moment direction and its force and moment values.
    pub max_direction: Vector3<f64>,
    pub max_force: f64,
    pub max_moment: f64,
    /// Direction orthogonal to the extremal pair.
    pub mid_direction: Vector3<f64>,
    pub mid_force: f64,
    pub mid_moment: f64,
    /// Smallest force moment direction and its values.
    pub min_direction: Vector3<f64>,
    pub min_force: f64,
    pub min_moment: f64,
    /// Ratio of the largest directed force to the contractility.
    pub polarity: f64,
}

/// Deformed fiber directions of one tetrahedron: the beam stretched the
/// most and the least, mapped through the deformation gradient.
#[derive(Debug, Clone, Serialize)]
pub struct PrincipalDirections {
    pub most_stretched: Vector3<f64>,
    pub least_stretched: Vector3<f64>,
    pub energy: f64,
}

fn forces_or_err(model: &FiberModel) -> Result<&[Vector3<f64>]> {
    model.forces().ok_or_else(|| {
        SolverError::InvalidInput(
            "no assembled state; run relax, regularize, or update_state first".into(),
        )
    })
}

/// Compute the force moments of all nodes within `rmax` of the origin.
pub fn force_moments(model: &FiberModel, rmax: f64) -> Result<ForceMoments> {
    let forces = forces_or_err(model)?;
    let nodes = model.nodes();

    let selected: Vec<usize> = (0..nodes.len())
        .filter(|&c| nodes[c].norm() < rmax)
        .collect();
    if selected.is_empty() {
        return Err(SolverError::InvalidInput(format!(
            "no nodes within radius {rmax}"
        )));
    }

    let mut force_sum = Vector3::zeros();
    // Normal equations of the force-line fit, weighted by force magnitude:
    // each force defines a line through its node; the center minimizes the
    // summed squared distance to those lines.
    let mut normal = Matrix3::zeros();
    let mut moment = Vector3::zeros();
    for &c in &selected {
        let force = forces[c];
        force_sum += force;
        let magnitude = force.norm();
        if magnitude > 0.0 {
            let projector =
                magnitude * Matrix3::identity() - force * force.transpose() / magnitude;
            normal += projector;
            moment += projector * nodes[c];
        }
    }
    let center = normal.try_inverse().map(|inverse| inverse * moment).unwrap_or_else(|| {
        // All forces parallel or vanishing; fall back to the selection
        // centroid.
        selected.iter().map(|&c| nodes[c]).sum::<Vector3<f64>>() / selected.len() as f64
    });

    let mut contractility = 0.0;
    for &c in &selected {
        let arm = nodes[c] - center;
        let distance = arm.norm();
        if distance > 0.0 {
            contractility += arm.dot(&forces[c]) / distance;
        }
    }

    // Scan a fixed direction set for the extremal force moments.
    let directions = build_beams(150);
    let directed = |axis: &Vector3<f64>| {
        let mut force = 0.0;
        let mut torque = 0.0;
        for &c in &selected {
            let arm = nodes[c] - center;
            let distance = arm.norm();
            if distance > 0.0 {
                let along = axis.dot(&forces[c]);
                force += (arm / distance).dot(axis) * along;
                torque += arm.dot(axis) * along;
            }
        }
        (force, torque)
    };

    let mut max_index = 0;
    let mut min_index = 0;
    let mut max_values = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    let mut min_values = (f64::INFINITY, f64::INFINITY);
    for (b, axis) in directions.iter().enumerate() {
        let values = directed(axis);
        if values.1 > max_values.1 || b == 0 {
            max_index = b;
            max_values = values;
        }
        if values.1 < min_values.1 || b == 0 {
            min_index = b;
            min_values = values;
        }
    }

    let cross = directions[max_index].cross(&directions[min_index]);
    let mid_direction = if cross.norm() > 0.0 {
        cross / cross.norm()
    } else {
        // Extremes coincide or oppose; pick any orthogonal direction.
        let axis = directions[max_index];
        let helper = if axis.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
        axis.cross(&helper).normalize()
    };
    let mid_values = directed(&mid_direction);

    let polarity = if contractility != 0.0 {
        max_values.0 / contractility
    } else {
        0.0
    };

    Ok(ForceMoments {
        force_sum,
        center,
        contractility,
        max_direction: directions[max_index],
        max_force: max_values.0,
        max_moment: max_values.1,
        mid_direction,
        mid_force: mid_values.0,
        mid_moment: mid_values.1,
        min_direction: directions[min_index],
        min_force: min_values.0,
        min_moment: min_values.1,
        polarity,
    })
}

/// Ratio of the displacement-weighted stiffness under the working material
/// to the same quadratic form under a reference material, typically one
/// without a stiffening regime. Values above one quantify how much the
/// deformation has stiffened the network.
pub fn stiffening_ratio(model: &FiberModel, reference: &dyn MaterialModel) -> Result<f64> {
    let system = model.system().ok_or_else(|| {
        SolverError::InvalidInput(
            "no assembled state; run relax, regularize, or update_state first".into(),
        )
    })?;
    let topology = model
        .topology()
        .ok_or_else(|| SolverError::InvalidInput("no connection tables".into()))?;

    let stiffened = system.coupling_energy(topology, model.displacements());
    let baseline = model
        .assembled_system_with(reference)?
        .coupling_energy(topology, model.displacements());
    if baseline == 0.0 {
        return Err(SolverError::InvalidInput(
            "the reference material carries no stiffness for this displacement field".into(),
        ));
    }
    Ok(stiffened / baseline)
}

/// Per-tetrahedron most and least stretched fiber directions in the
/// deformed frame.
pub fn principal_fiber_directions(model: &FiberModel) -> Result<Vec<PrincipalDirections>> {
    let energies = model.energies().ok_or_else(|| {
        SolverError::InvalidInput(
            "no assembled state; run relax, regularize, or update_state first".into(),
        )
    })?;
    let beams = model.beams();
    if beams.is_empty() {
        return Err(SolverError::InvalidInput("no beam set".into()));
    }
    let mesh = model.mesh();
    let shape = model
        .shape()
        .ok_or_else(|| SolverError::InvalidInput("no tetrahedra loaded".into()))?;

    let displacements = model.displacements();
    let mut out = Vec::with_capacity(mesh.tet_count());
    for (t, tet) in mesh.tets.iter().enumerate() {
        let rows = &shape.rows[t];
        let mut gradient = Matrix3::identity();
        for m in 0..4 {
            gradient += displacements[tet[m]] * rows[m].transpose();
        }
        let mut most = gradient * beams[0];
        let mut least = most;
        let mut highest = most.norm();
        let mut lowest = highest;
        for beam in &beams[1..] {
            let deformed = gradient * beam;
            let stretch = deformed.norm();
            if stretch > highest {
                highest = stretch;
                most = deformed;
            }
            if stretch < lowest {
                lowest = stretch;
                least = deformed;
            }
        }
        out.push(PrincipalDirections {
            most_stretched: most,
            least_stretched: least,
            energy: energies[t],
        });
    }
    Ok(out)
}

/// Nodal force density: the reaction force divided by the lumped quarter
/// volume of the incident tetrahedra. Nodes outside every tetrahedron get a
/// zero density.
pub fn force_densities(model: &FiberModel) -> Result<Vec<Vector3<f64>>> {
    let forces = forces_or_err(model)?;
    let volumes = model
        .volumes()
        .ok_or_else(|| SolverError::InvalidInput("no tetrahedra loaded".into()))?;
    let mesh = model.mesh();

    let mut lumped = vec![0.0; mesh.node_count()];
    for (t, tet) in mesh.tets.iter().enumerate() {
        for &c in tet {
            lumped[c] += volumes[t] * 0.25;
        }
    }
    Ok(forces
        .iter()
        .zip(&lumped)
        .map(|(force, &volume)| {
            if volume > 0.0 {
                force / volume
            } else {
                Vector3::zeros()
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{LinearSpring, SemiAffineFiberMaterial};
    use crate::model::{FiberModel, RelaxConfig};

    fn nan3() -> Vector3<f64> {
        Vector3::new(f64::NAN, f64::NAN, f64::NAN)
    }

    /// One tetrahedron around the origin, three corners held at an
    /// anisotropic stretch (strongest along x) and one corner relaxed.
    /// Holding three non-collinear corners keeps the force-line fit well
    /// posed.
    fn stretched_tet_model() -> FiberModel {
        let nodes = vec![
            Vector3::new(-0.5, -0.3, -0.3),
            Vector3::new(0.5, -0.3, -0.3),
            Vector3::new(0.0, 0.7, -0.3),
            Vector3::new(0.0, 0.0, 0.7),
        ];
        let centroid: Vector3<f64> = nodes.iter().sum::<Vector3<f64>>() / 4.0;
        let stretch = |r: &Vector3<f64>| {
            let arm = r - centroid;
            Vector3::new(0.04 * arm.x, 0.01 * arm.y, 0.01 * arm.z)
        };

        let mut model = FiberModel::new();
        model.set_nodes(nodes.clone()).unwrap();
        model.set_tetrahedra(vec![[0, 1, 2, 3]]).unwrap();
        model.compute_beams(60).unwrap();
        model.set_material_model(Box::new(SemiAffineFiberMaterial::new(
            1645.0, 0.0008, 0.0075, 0.033,
        )));
        let prescribed = vec![
            stretch(&nodes[0]),
            stretch(&nodes[1]),
            stretch(&nodes[2]),
            nan3(),
        ];
        let external = vec![Vector3::zeros(); 4];
        model.set_boundary_condition(&prescribed, &external).unwrap();
        let config = RelaxConfig {
            stepper: 0.2,
            max_iterations: 200,
            rel_stability: 1e-10,
            cg_tolerance: 1e-8,
        };
        model.relax(&config).unwrap();
        model
    }

    #[test]
    fn reports_need_an_assembled_state() {
        let mut model = FiberModel::new();
        model
            .set_nodes(vec![
                Vector3::zeros(),
                Vector3::x(),
                Vector3::y(),
                Vector3::z(),
            ])
            .unwrap();
        model.set_tetrahedra(vec![[0, 1, 2, 3]]).unwrap();
        assert!(force_moments(&model, 10.0).is_err());
        assert!(force_densities(&model).is_err());
    }

    #[test]
    fn stretched_state_is_contractile_around_the_centroid() {
        let model = stretched_tet_model();
        let moments = force_moments(&model, 100.0).unwrap();

        // The held corners are pulled outward, so their reactions point
        // away from the centroid and the radial force total is positive.
        assert!(moments.contractility > 0.0);
        // The force lines keep the fitted center inside the element.
        assert!(moments.center.norm() < 0.6, "center {:?}", moments.center);
        // Reactions cancel in the sum.
        assert!(moments.force_sum.norm() < 1e-5);
        // The stretch is four times stronger along x, so the dominant
        // moment direction is closer to x than to the other axes.
        assert!(moments.max_direction.x.abs() > moments.max_direction.y.abs());
        assert!(moments.max_direction.x.abs() > moments.max_direction.z.abs());
        assert!(moments.max_moment >= moments.mid_moment);
        assert!(moments.mid_moment >= moments.min_moment);
    }

    #[test]
    fn stiffening_ratio_exceeds_one_past_the_onset() {
        // Anchors at zero displacement and one loaded free node: the
        // quadratic form then reduces to the free block and stays
        // positive for any material.
        let mut model = FiberModel::new();
        model
            .set_nodes(vec![
                Vector3::zeros(),
                Vector3::x(),
                Vector3::y(),
                Vector3::z(),
            ])
            .unwrap();
        model.set_tetrahedra(vec![[0, 1, 2, 3]]).unwrap();
        model.compute_beams(60).unwrap();
        model.set_material_model(Box::new(SemiAffineFiberMaterial::new(
            1645.0, 0.0008, 0.0075, 0.033,
        )));
        let prescribed = vec![Vector3::zeros(), Vector3::zeros(), Vector3::zeros(), nan3()];
        let external = vec![
            Vector3::zeros(),
            Vector3::zeros(),
            Vector3::zeros(),
            Vector3::new(0.0, 0.0, 5.0),
        ];
        model.set_boundary_condition(&prescribed, &external).unwrap();
        let config = RelaxConfig {
            stepper: 0.1,
            max_iterations: 300,
            rel_stability: 1e-8,
            cg_tolerance: 1e-8,
        };
        model.relax(&config).unwrap();

        // The pull drives many fibers well beyond the 0.75 percent onset,
        // so the tangent stiffness must exceed the non-stiffening
        // reference.
        assert!(model.displacements()[3].z > 0.02);
        let reference = SemiAffineFiberMaterial::without_stiffening(1645.0, 0.0008);
        let ratio = stiffening_ratio(&model, &reference).unwrap();
        assert!(ratio > 1.0, "ratio {ratio}");
    }

    #[test]
    fn principal_directions_follow_the_stretch_axis() {
        let model = stretched_tet_model();
        let principal = principal_fiber_directions(&model).unwrap();
        assert_eq!(principal.len(), 1);
        let most = principal[0].most_stretched;
        assert!(most.x.abs() > most.y.abs());
        assert!(most.x.abs() > most.z.abs());
        assert!(principal[0].energy > 0.0);
    }

    #[test]
    fn force_densities_scale_with_the_lumped_volume() {
        let model = stretched_tet_model();
        let densities = force_densities(&model).unwrap();
        let forces = model.forces().unwrap();
        let volume = model.volumes().unwrap()[0];
        for (density, force) in densities.iter().zip(forces) {
            assert!((density - force / (volume * 0.25)).norm() < 1e-12);
        }
    }

    #[test]
    fn parallel_forces_fall_back_to_the_centroid() {
        // A state whose forces are all parallel makes the normal equations
        // singular; the center falls back to the selection centroid.
        let mut model = FiberModel::new();
        model
            .set_nodes(vec![
                Vector3::zeros(),
                Vector3::x(),
                Vector3::y(),
                Vector3::z(),
            ])
            .unwrap();
        model.set_tetrahedra(vec![[0, 1, 2, 3]]).unwrap();
        model.compute_beams(40).unwrap();
        model.set_material_model(Box::new(LinearSpring { stiffness: 10.0 }));
        model.update_state().unwrap();
        // Zero displacements: all forces vanish, the projector sum stays
        // zero, and the fallback centroid is used.
        let moments = force_moments(&model, 100.0).unwrap();
        let centroid = Vector3::new(0.25, 0.25, 0.25);
        assert!((moments.center - centroid).norm() < 1e-12);
        assert_eq!(moments.contractility, 0.0);
    }
}
