//! Conjugate-gradient solve of the linearized displacement step.
//!
//! The operator is supplied as a closure, so the solver never sees the
//! stiffness representation. All vectors carry one entry per node; fixed
//! rows of the right-hand side must be zero and the operator must write
//! only free rows, which keeps every iterate masked to the free nodes
//! without explicit bookkeeping.

use log::{debug, warn};
use nalgebra::Vector3;

/// Result of a conjugate-gradient solve.
#[derive(Debug, Clone)]
pub struct CgSolution {
    /// The computed displacement increment (the best iterate when the
    /// solve did not converge).
    pub increment: Vec<Vector3<f64>>,
    /// Iterations performed.
    pub iterations: usize,
    /// Whether the relative residual tolerance was met.
    pub converged: bool,
    /// Final residual norm.
    pub residual_norm: f64,
}

fn dot(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x.dot(y)).sum()
}

/// Solve K * du = rhs to a relative residual below `tolerance`, with an
/// iteration cap of three times the node count.
///
/// A zero right-hand side returns immediately. Hitting the cap or a zero
/// curvature direction is advisory: the current iterate is returned and a
/// warning is logged.
pub fn solve<A>(apply: A, rhs: &[Vector3<f64>], tolerance: f64) -> CgSolution
where
    A: Fn(&[Vector3<f64>], &mut [Vector3<f64>]),
{
    let n = rhs.len();
    let max_iterations = 3 * n;

    let rhs_norm_squared = dot(rhs, rhs);
    if rhs_norm_squared == 0.0 {
        return CgSolution {
            increment: vec![Vector3::zeros(); n],
            iterations: 0,
            converged: true,
            residual_norm: 0.0,
        };
    }
    let threshold = tolerance * tolerance * rhs_norm_squared;

    // With a zero initial guess the first residual is the right-hand side.
    let mut increment = vec![Vector3::zeros(); n];
    let mut residual = rhs.to_vec();
    let mut direction = residual.clone();
    let mut product = vec![Vector3::zeros(); n];
    let mut rho = rhs_norm_squared;

    for iteration in 1..=max_iterations {
        apply(&direction, &mut product);
        let curvature = dot(&direction, &product);
        if curvature == 0.0 {
            warn!(
                "conjugate gradient met a zero curvature direction after {iteration} iterations, \
                 returning the current iterate"
            );
            return CgSolution {
                increment,
                iterations: iteration,
                converged: false,
                residual_norm: rho.sqrt(),
            };
        }

        let alpha = rho / curvature;
        for c in 0..n {
            increment[c] += alpha * direction[c];
            residual[c] -= alpha * product[c];
        }

        let rho_next = dot(&residual, &residual);
        if rho_next < threshold {
            debug!(
                "conjugate gradient converged after {iteration} iterations, residual {:.3e}",
                rho_next.sqrt()
            );
            return CgSolution {
                increment,
                iterations: iteration,
                converged: true,
                residual_norm: rho_next.sqrt(),
            };
        }

        let beta = rho_next / rho;
        for c in 0..n {
            direction[c] = residual[c] + beta * direction[c];
        }
        rho = rho_next;
    }

    warn!(
        "conjugate gradient reached the iteration cap of {max_iterations} with relative residual \
         {:.3e}, returning the best iterate",
        (rho / rhs_norm_squared).sqrt()
    );
    CgSolution {
        increment,
        iterations: max_iterations,
        converged: false,
        residual_norm: rho.sqrt(),
    }
}
