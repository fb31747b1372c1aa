use crate::error::{ConfigError, require_finite, require_range};
use crate::mesh::Discretization;

/// Tikhonov model objective with a smallness and a first-derivative smoothness term.
///
/// `phi_m(m) = alpha_s ||m - m_ref||^2 + alpha_x ||d(m - m_ref)/dx||^2`, with both norms
/// taken as midpoint-rule integrals over the unit interval:
/// `||v||^2 = h sum v_j^2` and `||dv/dx||^2 = h sum ((v_{j+1} - v_j) / h)^2`.
/// Differences live on interior faces only, so no flux crosses either end of the
/// interval.
#[derive(Debug, Clone)]
pub struct Tikhonov {
    alpha_s: f64,
    alpha_x: f64,
    cell_width: f64,
    reference: Vec<f64>,
}

impl Tikhonov {
    pub fn new(
        mesh: &Discretization,
        alpha_s: f64,
        alpha_x: f64,
        reference: Vec<f64>,
    ) -> Result<Self, ConfigError> {
        require_range("alpha_s", alpha_s, "alpha_s >= 0", alpha_s >= 0.0)?;
        require_range("alpha_x", alpha_x, "alpha_x >= 0", alpha_x >= 0.0)?;
        if reference.len() != mesh.ncells() {
            return Err(ConfigError::LengthMismatch {
                what: "reference model",
                expected: mesh.ncells(),
                actual: reference.len(),
            });
        }
        require_finite("reference model", &reference)?;
        Ok(Self {
            alpha_s,
            alpha_x,
            cell_width: mesh.cell_width(),
            reference,
        })
    }

    pub fn ncells(&self) -> usize {
        self.reference.len()
    }

    pub fn reference(&self) -> &[f64] {
        &self.reference
    }

    /// Rows contributed to the stacked least-squares system: one smallness row per cell
    /// and one smoothness row per interior face.
    pub fn nrows(&self) -> usize {
        regularization_rows(self.ncells())
    }

    /// Coefficient of each smallness row, `sqrt(alpha_s h)`.
    pub fn smallness_weight(&self) -> f64 {
        (self.alpha_s * self.cell_width).sqrt()
    }

    /// Coefficient of each smoothness difference, `sqrt(alpha_x h) / h`.
    pub fn smoothness_weight(&self) -> f64 {
        (self.alpha_x * self.cell_width).sqrt() / self.cell_width
    }

    /// Smallness part of phi_m.
    pub fn smallness(&self, model: &[f64]) -> f64 {
        let mut sum = 0.0;
        for (m, r) in model.iter().zip(&self.reference) {
            let v = m - r;
            sum += v * v;
        }
        self.alpha_s * self.cell_width * sum
    }

    /// Smoothness part of phi_m.
    pub fn smoothness(&self, model: &[f64]) -> f64 {
        let w = self.smoothness_weight();
        let mut sum = 0.0;
        for j in 1..model.len() {
            let v = w * ((model[j] - self.reference[j]) - (model[j - 1] - self.reference[j - 1]));
            sum += v * v;
        }
        sum
    }

    pub fn phi(&self, model: &[f64]) -> f64 {
        self.smallness(model) + self.smoothness(model)
    }

    /// Writes `sqrt(beta) R (m - m_ref)` into `out`, smallness rows first.
    ///
    /// The squared norm of `out` is `beta * phi_m(m)`.
    pub fn scaled_residuals(&self, model: &[f64], beta: f64, out: &mut [f64]) {
        let n = self.ncells();
        debug_assert_eq!(out.len(), self.nrows());
        let scale = beta.sqrt();
        let ws = scale * self.smallness_weight();
        let wx = scale * self.smoothness_weight();
        let (small, smooth) = out.split_at_mut(n);
        for ((o, m), r) in small.iter_mut().zip(model).zip(&self.reference) {
            *o = ws * (m - r);
        }
        for (j, o) in smooth.iter_mut().enumerate() {
            let lo = model[j] - self.reference[j];
            let hi = model[j + 1] - self.reference[j + 1];
            *o = wx * (hi - lo);
        }
    }

    /// Writes `R^T R v` (the Hessian of phi_m up to a factor of two) into `out`.
    pub fn hessian_apply(&self, v: &[f64], out: &mut [f64]) {
        let cs = self.alpha_s * self.cell_width;
        let cx = self.alpha_x / self.cell_width;
        for (o, x) in out.iter_mut().zip(v) {
            *o = cs * x;
        }
        for j in 1..v.len() {
            let diff = cx * (v[j] - v[j - 1]);
            out[j] += diff;
            out[j - 1] -= diff;
        }
    }
}

pub(crate) fn regularization_rows(ncells: usize) -> usize {
    2 * ncells - 1
}
