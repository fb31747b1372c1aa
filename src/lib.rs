//! Tikhonov-regularized inversion of 1-D linear forward problems.
//!
//! The crate builds a synthetic experiment and inverts it:
//! - `build_kernel` samples the kernel functions `g_i(x) = exp(p i x) cos(pi q i x)` on a
//!   uniform cell-centered discretization of [0, 1] into a dense matrix G.
//! - `build_true_model` samples a box-plus-Gaussian ground truth on the same cells.
//! - `simulate` computes `d = G m`, optionally adds noise, and assigns uncertainties.
//! - `invert` minimizes `phi_d(m) + beta phi_m(m)` with a damped Gauss-Newton step.
//!
//! How the inversion works (high level):
//! - Estimate beta0 from the ratio of the largest eigenvalues of the data and model
//!   Hessians.
//! - Each outer iteration solves the stacked system
//!   `[W G; sqrt(beta) R; sqrt(lambda) I] p = [-W (G m - d); -sqrt(beta) R (m - m_ref); 0]`
//!   with sparse QR and adapts the damping `lambda` from the ratio of actual to predicted
//!   decrease.
//! - Beta is cooled on a fixed schedule and the run stops once
//!   `phi_d <= rms^2 * ndata` (discrepancy principle).
//!
//! Example:
//! ```rust,no_run
//! use linear_inversion::{
//!     InversionOptions, KernelParams, ModelParams, NoiseOptions, build_kernel,
//!     build_true_model, invert, simulate,
//! };
//!
//! let kernel = build_kernel(&KernelParams::default()).unwrap();
//! let model = build_true_model(kernel.mesh(), &ModelParams::default()).unwrap();
//! let synthetic = simulate(&kernel, &model, &NoiseOptions::default()).unwrap();
//! let trace = invert(
//!     &kernel,
//!     &synthetic.data,
//!     &synthetic.uncertainty,
//!     &InversionOptions::default(),
//! )
//! .unwrap();
//! println!("stopped after {} iterations: {:?}", trace.iterations(), trace.status);
//! ```

mod directives;
mod error;
mod inversion;
mod kernel;
mod mesh;
mod misfit;
mod model;
mod pattern;
mod regularization;
mod report;
mod simulate;

pub use directives::{BetaCooling, BetaEstimate, BetaSchedule, Directives, TargetMisfit};
pub use error::{ConfigError, InversionError};
pub use inversion::{InversionOptions, TikhonovSolver, invert};
pub use kernel::{Kernel, KernelParams, build_kernel};
pub use mesh::Discretization;
pub use misfit::DataMisfit;
pub use model::{ModelParams, build_true_model};
pub use regularization::Tikhonov;
pub use report::{
    InversionStatus, IterationReport, Reporter, Snapshot, StdoutReporter, Trace,
};
pub use simulate::{NoiseOptions, SyntheticData, simulate, uncertainty};

pub use faer_core::Parallelism;
