use core::f64::consts::PI;

use crate::error::{ConfigError, require_range};
use crate::mesh::Discretization;

/// Parameters of the exponential-cosine kernel family.
#[derive(Debug, Clone)]
pub struct KernelParams {
    /// Number of data (rows of G).
    pub ndata: usize,
    /// Number of model cells (columns of G).
    pub ncells: usize,
    /// Decay rate p; negative values damp each row towards x = 1.
    pub decay: f64,
    /// Oscillation rate q.
    pub oscillation: f64,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            ndata: 20,
            ncells: 100,
            decay: -0.25,
            oscillation: 0.25,
        }
    }
}

/// Dense forward operator G together with the discretization it was sampled on.
///
/// Entries are stored row-major: row `i` is the i-th kernel function
/// `g_i(x) = exp(p i x) cos(pi q i x)` evaluated at every cell center.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    mesh: Discretization,
    ndata: usize,
    values: Vec<f64>,
}

/// Builds the kernel matrix for the given parameters.
pub fn build_kernel(params: &KernelParams) -> Result<Kernel, ConfigError> {
    if params.ndata == 0 {
        return Err(ConfigError::EmptyDimension {
            what: "number of data",
        });
    }
    require_range("decay", params.decay, "finite value", true)?;
    require_range("oscillation", params.oscillation, "finite value", true)?;
    let mesh = Discretization::unit_interval(params.ncells)?;

    let ncells = mesh.ncells();
    let mut values = Vec::with_capacity(params.ndata * ncells);
    for i in 0..params.ndata {
        let k = i as f64;
        for &x in mesh.centers() {
            values.push((params.decay * k * x).exp() * (PI * params.oscillation * k * x).cos());
        }
    }

    Ok(Kernel {
        mesh,
        ndata: params.ndata,
        values,
    })
}

impl Kernel {
    /// Number of data (rows).
    pub fn ndata(&self) -> usize {
        self.ndata
    }

    /// Number of model cells (columns).
    pub fn ncells(&self) -> usize {
        self.mesh.ncells()
    }

    /// Discretization shared by the kernel and every model on it.
    pub fn mesh(&self) -> &Discretization {
        &self.mesh
    }

    /// Row-major matrix entries.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Kernel function `i` sampled at the cell centers.
    pub fn row(&self, i: usize) -> &[f64] {
        let ncells = self.ncells();
        &self.values[i * ncells..(i + 1) * ncells]
    }

    /// Entry G[i, j].
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.ncells() + j]
    }

    /// Writes G·model into `out`.
    pub fn apply_into(&self, model: &[f64], out: &mut [f64]) {
        debug_assert_eq!(model.len(), self.ncells());
        debug_assert_eq!(out.len(), self.ndata);
        for (i, o) in out.iter_mut().enumerate() {
            *o = dot(self.row(i), model);
        }
    }

    /// Returns G·model.
    pub fn apply(&self, model: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.ndata];
        self.apply_into(model, &mut out);
        out
    }

    /// Writes Gᵀ·v into `out`.
    pub fn apply_transpose_into(&self, v: &[f64], out: &mut [f64]) {
        debug_assert_eq!(v.len(), self.ndata);
        debug_assert_eq!(out.len(), self.ncells());
        out.fill(0.0);
        for (i, &vi) in v.iter().enumerate() {
            for (o, g) in out.iter_mut().zip(self.row(i)) {
                *o += g * vi;
            }
        }
    }

    /// Returns Gᵀ·v.
    pub fn apply_transpose(&self, v: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.ncells()];
        self.apply_transpose_into(v, &mut out);
        out
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += x * y;
    }
    sum
}
