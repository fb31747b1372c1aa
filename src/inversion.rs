use std::time::{Duration, Instant};

use dyn_stack::{GlobalPodBuffer, PodStack, ReborrowMut, StackReq};
use faer_core::mat;
use faer_core::sparse::SparseColMatRef;
use faer_core::{Conj, Parallelism};
use faer_sparse::qr::{QrSymbolicParams, SymbolicQr, factorize_symbolic_qr};

use crate::directives::{BetaEstimate, BetaSchedule, Directives, TargetMisfit};
use crate::error::{ConfigError, InversionError, require_range};
use crate::kernel::{Kernel, dot};
use crate::misfit::DataMisfit;
use crate::pattern::StackedPattern;
use crate::regularization::Tikhonov;
use crate::report::{
    InversionStatus, IterationReport, Reporter, StdoutReporter, Trace, emit_line,
};

/// Options controlling a Tikhonov inversion.
#[derive(Debug, Clone)]
pub struct InversionOptions {
    /// Maximum number of outer iterations.
    pub max_iter: usize,
    /// Constant value of the starting model.
    pub starting_model: f64,
    /// Constant value of the reference model.
    pub reference_model: f64,
    /// Target RMS misfit; the run stops once phi_d <= rms^2 * ndata.
    pub rms: f64,
    /// Scale applied to the eigenvalue-ratio estimate of beta0.
    pub beta0_ratio: f64,
    /// Beta is divided by this factor on every cooling step; 1 disables cooling.
    pub cooling_factor: f64,
    /// Number of iterations between cooling steps.
    pub cooling_rate: usize,
    /// Smallness weight.
    pub alpha_s: f64,
    /// Smoothness weight.
    pub alpha_x: f64,
    /// Power iterations used by the beta0 estimate.
    pub beta_power_iterations: usize,
    /// Seed of the beta0 estimate's start vector.
    pub beta_seed: u64,
    /// Initial damping parameter.
    pub lambda_init: f64,
    /// Minimum damping parameter.
    pub lambda_min: f64,
    /// Maximum damping parameter.
    pub lambda_max: f64,
    /// Stop when ||grad phi||_inf <= grad_tol.
    pub grad_tol: f64,
    /// Stop when an accepted step satisfies ||p||_2 <= step_tol * (||m||_2 + step_tol).
    pub step_tol: f64,
    /// Print the iteration table and elapsed time.
    pub verbose: bool,
}

impl Default for InversionOptions {
    fn default() -> Self {
        Self {
            max_iter: 60,
            starting_model: 0.0,
            reference_model: 0.0,
            rms: 1.0,
            beta0_ratio: 1.0,
            cooling_factor: 1.0,
            cooling_rate: 1,
            alpha_s: 1.0,
            alpha_x: 1.0,
            beta_power_iterations: 50,
            beta_seed: 0,
            lambda_init: 1e-3,
            lambda_min: 1e-12,
            lambda_max: 1e12,
            grad_tol: 1e-10,
            step_tol: 1e-10,
            verbose: false,
        }
    }
}

impl InversionOptions {
    /// Beta estimate, cooling schedule and target misfit described by these options.
    pub fn directives(&self) -> Result<Directives, ConfigError> {
        let schedule = BetaSchedule {
            cooling_factor: self.cooling_factor,
            cooling_rate: self.cooling_rate,
        };
        schedule.validate()?;
        Directives::new(
            BetaEstimate {
                ratio: self.beta0_ratio,
                power_iterations: self.beta_power_iterations,
                seed: self.beta_seed,
            },
            schedule,
            TargetMisfit { rms: self.rms },
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iter == 0 {
            return Err(ConfigError::EmptyDimension {
                what: "maximum iterations",
            });
        }
        require_range("starting_model", self.starting_model, "finite value", true)?;
        require_range("reference_model", self.reference_model, "finite value", true)?;
        require_range(
            "lambda_min",
            self.lambda_min,
            "lambda_min > 0",
            self.lambda_min > 0.0,
        )?;
        require_range(
            "lambda_init",
            self.lambda_init,
            "lambda_min <= lambda_init <= lambda_max",
            self.lambda_min <= self.lambda_init && self.lambda_init <= self.lambda_max,
        )?;
        require_range("lambda_max", self.lambda_max, "finite value", true)?;
        require_range("grad_tol", self.grad_tol, "grad_tol >= 0", self.grad_tol >= 0.0)?;
        require_range("step_tol", self.step_tol, "step_tol >= 0", self.step_tol >= 0.0)
    }
}

// Byte alignment of the QR values and right-hand side carved from the workspace, so the
// SIMD kernels take the same path no matter where the buffer was allocated.
const WORKSPACE_ALIGN: usize = 128;

/// Damped Gauss-Newton solver for `min phi_d(m) + beta phi_m(m)`.
///
/// The sparsity of the stacked system depends only on the number of data and cells,
/// so the symbolic QR analysis and every workspace are built once and reused by each
/// `solve` call.
pub struct TikhonovSolver {
    pattern: StackedPattern,
    symbolic_qr: SymbolicQr<usize>,
    qr_indices: Vec<usize>,
    qr_stack: GlobalPodBuffer,
    parallelism: Parallelism,
    values: Vec<f64>,
    residuals: Vec<f64>,
    trial_residuals: Vec<f64>,
    step: Vec<f64>,
    gradient: Vec<f64>,
    model: Vec<f64>,
    model_trial: Vec<f64>,
    predicted: Vec<f64>,
}

enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(StdoutReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    fn new(reporter: Option<&'a mut dyn Reporter>, verbose: bool) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbose => Self::Local(StdoutReporter::new()),
            None => Self::None,
        }
    }

    fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }
}

impl TikhonovSolver {
    /// Create a solver for `ndata` data and `ncells` model cells.
    pub fn new(
        ndata: usize,
        ncells: usize,
        parallelism: Parallelism,
    ) -> Result<Self, InversionError> {
        if ndata == 0 {
            return Err(ConfigError::EmptyDimension {
                what: "number of data",
            }
            .into());
        }
        if ncells == 0 {
            return Err(ConfigError::EmptyDimension {
                what: "number of cells",
            }
            .into());
        }

        let pattern = StackedPattern::new(ndata, ncells);
        let symbolic_qr = factorize_symbolic_qr(
            pattern.as_symbolic(),
            QrSymbolicParams::default(),
        )
        .map_err(InversionError::Factorization)?;

        let factor_req = symbolic_qr
            .factorize_numeric_qr_req::<f64>(parallelism)
            .map_err(|_| InversionError::WorkspaceOverflow)?;
        let solve_req = symbolic_qr
            .solve_in_place_req::<f64>(1, parallelism)
            .map_err(|_| InversionError::WorkspaceOverflow)?;
        let values_req =
            StackReq::try_new_aligned::<f64>(symbolic_qr.len_values(), WORKSPACE_ALIGN)
                .map_err(|_| InversionError::WorkspaceOverflow)?;
        let rhs_req = StackReq::try_new_aligned::<f64>(pattern.nrows(), WORKSPACE_ALIGN)
            .map_err(|_| InversionError::WorkspaceOverflow)?;
        let req = factor_req
            .try_or(solve_req)
            .and_then(|scratch| values_req.try_and(rhs_req)?.try_and(scratch))
            .map_err(|_| InversionError::WorkspaceOverflow)?;
        let qr_stack =
            GlobalPodBuffer::try_new(req).map_err(|_| InversionError::WorkspaceAlloc)?;

        let values = vec![0.0; pattern.nnz()];
        let qr_indices = vec![0usize; symbolic_qr.len_indices()];

        let residual_rows = pattern.residual_rows();
        Ok(Self {
            pattern,
            symbolic_qr,
            qr_indices,
            qr_stack,
            parallelism,
            values,
            residuals: vec![0.0; residual_rows],
            trial_residuals: vec![0.0; residual_rows],
            step: vec![0.0; ncells],
            gradient: vec![0.0; ncells],
            model: vec![0.0; ncells],
            model_trial: vec![0.0; ncells],
            predicted: vec![0.0; ndata],
        })
    }

    pub fn ndata(&self) -> usize {
        self.pattern.ndata()
    }

    pub fn ncells(&self) -> usize {
        self.pattern.ncols()
    }

    /// Invert `observed` with the directives described by `options`.
    pub fn solve(
        &mut self,
        kernel: &Kernel,
        observed: &[f64],
        uncertainty: &[f64],
        options: &InversionOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<Trace, InversionError> {
        let directives = options.directives()?;
        self.solve_with_directives(kernel, observed, uncertainty, options, &directives, reporter)
    }

    /// Invert `observed` with caller-supplied directives.
    ///
    /// The directive fields of `options` (`beta0_ratio`, `cooling_*`, `rms`,
    /// `beta_power_iterations`, `beta_seed`) are ignored in favor of `directives`.
    pub fn solve_with_directives(
        &mut self,
        kernel: &Kernel,
        observed: &[f64],
        uncertainty: &[f64],
        options: &InversionOptions,
        directives: &Directives,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<Trace, InversionError> {
        let n = self.ncells();
        let ndata = self.ndata();
        if kernel.ncells() != n {
            return Err(ConfigError::LengthMismatch {
                what: "kernel columns",
                expected: n,
                actual: kernel.ncells(),
            }
            .into());
        }
        if kernel.ndata() != ndata {
            return Err(ConfigError::LengthMismatch {
                what: "kernel rows",
                expected: ndata,
                actual: kernel.ndata(),
            }
            .into());
        }
        options.validate()?;
        directives.beta_estimate.validate()?;
        directives.target.validate()?;
        let misfit = DataMisfit::new(kernel, observed, uncertainty)?;
        let reg = Tikhonov::new(
            kernel.mesh(),
            options.alpha_s,
            options.alpha_x,
            vec![options.reference_model; n],
        )?;

        let start_time = options.verbose.then(Instant::now);
        let mut reporter = ReporterSlot::new(reporter, options.verbose);

        let m = self.pattern.residual_rows();
        let mut beta = directives.beta_estimate.estimate(&misfit, &reg);
        let mut lambda = clamp_lambda(options.lambda_init, options);
        self.model.fill(options.starting_model);
        let mut trace = Trace::new(
            self.model.clone(),
            directives.target.target(ndata),
            options.max_iter,
        );

        // W G never changes during a run.
        self.pattern
            .fill_data(&mut self.values, kernel, misfit.weights());

        let mut status = InversionStatus::MaxIterations;
        for iter in 0..options.max_iter {
            if let Some(reporter) = reporter.as_mut() {
                if !reporter.keep_going() {
                    status = InversionStatus::Cancelled;
                    break;
                }
            }

            // Residuals of the stacked system and cost phi = phi_d + beta * phi_m.
            let scale = beta.sqrt();
            self.pattern.fill_regularization(
                &mut self.values,
                scale * reg.smallness_weight(),
                scale * reg.smoothness_weight(),
            );
            let cost = stacked_residuals(
                &misfit,
                &reg,
                beta,
                &self.model,
                &mut self.predicted,
                &mut self.residuals,
            );
            if !cost.is_finite() {
                return Err(numerical_failure(iter, trace, start_time, &mut reporter));
            }

            // Gradient g = J^T r; check for a stationary point.
            compute_gradient(
                &mut self.gradient,
                &self.pattern,
                &self.values,
                &self.residuals,
            );
            let grad_inf = max_abs(&self.gradient);
            if grad_inf <= options.grad_tol {
                status = InversionStatus::Stalled;
                break;
            }

            // Solve the damped system via augmented QR: [J; sqrt(lambda) I] p = [-r; 0].
            self.pattern.fill_damping(&mut self.values, lambda.sqrt());
            let a = SparseColMatRef::<'_, usize, f64>::new(
                self.pattern.as_symbolic(),
                self.values.as_slice(),
            );
            let stack = PodStack::new(&mut self.qr_stack);
            let (qr_values, stack) = stack
                .make_aligned_raw::<f64>(self.symbolic_qr.len_values(), WORKSPACE_ALIGN);
            let (rhs, mut stack) = stack.make_aligned_raw::<f64>(m + n, WORKSPACE_ALIGN);
            qr_values.fill(0.0);
            for i in 0..m {
                rhs[i] = -self.residuals[i];
            }
            rhs[m..].fill(0.0);

            let qr = self.symbolic_qr.factorize_numeric_qr::<f64>(
                &mut self.qr_indices,
                &mut *qr_values,
                a,
                self.parallelism,
                stack.rb_mut(),
            );

            let mut rhs_mat = mat::from_column_major_slice_mut::<f64>(&mut *rhs, m + n, 1);
            qr.solve_in_place_with_conj(
                Conj::No,
                rhs_mat.rb_mut(),
                self.parallelism,
                stack.rb_mut(),
            );

            // Step p is the first n entries of the solved system.
            self.step.copy_from_slice(&rhs[..n]);
            let step = &self.step;
            if step.iter().any(|v| !v.is_finite()) {
                return Err(numerical_failure(iter, trace, start_time, &mut reporter));
            }
            let step_norm = l2_norm(step);

            let predicted_decrease = predicted_decrease(step, &self.gradient, lambda);
            let mut rho = 0.0;
            let mut accepted = false;
            if predicted_decrease > 0.0 {
                for i in 0..n {
                    self.model_trial[i] = self.model[i] + step[i];
                }
                let trial_cost = stacked_residuals(
                    &misfit,
                    &reg,
                    beta,
                    &self.model_trial,
                    &mut self.predicted,
                    &mut self.trial_residuals,
                );
                let actual = cost - trial_cost;
                if actual.is_finite() {
                    rho = actual / predicted_decrease;
                    accepted = rho > 0.0 && trial_cost.is_finite();
                }
            }

            let step_lambda = lambda;
            let mut small_step = false;
            if accepted {
                small_step =
                    step_norm <= options.step_tol * (l2_norm(&self.model) + options.step_tol);
                self.model.copy_from_slice(&self.model_trial);
                lambda = clamp_lambda(update_lambda(lambda, rho), options);
            } else {
                lambda = clamp_lambda(lambda * 2.0, options);
            }

            // Record the model carried into the next iteration.
            kernel.apply_into(&self.model, &mut self.predicted);
            let phi_d = misfit.phi(&self.predicted);
            let phi_m_small = reg.smallness(&self.model);
            let phi_m_smooth = reg.smoothness(&self.model);
            let phi_m = phi_m_small + phi_m_smooth;
            let phi = phi_d + beta * phi_m;
            trace.models.push(self.model.clone());
            trace.predictions.push(self.predicted.clone());
            trace.phi_d.push(phi_d);
            trace.phi_m.push(phi_m);
            trace.phi_m_small.push(phi_m_small);
            trace.phi_m_smooth.push(phi_m_smooth);
            trace.betas.push(beta);
            trace.phi.push(phi);

            if let Some(reporter) = reporter.as_mut() {
                reporter.on_iteration(&IterationReport {
                    iteration: iter,
                    beta,
                    phi_d,
                    phi_m,
                    phi,
                    lambda: step_lambda,
                    step_norm,
                    grad_inf,
                    accepted,
                });
            }

            if directives.target.reached(phi_d, ndata) {
                log::info!(
                    "target misfit {:.4e} reached at iteration {iter} (phi_d = {phi_d:.4e})",
                    trace.target_misfit
                );
                trace.target_iteration = Some(iter);
                status = InversionStatus::TargetReached;
                break;
            }
            if small_step {
                status = InversionStatus::Stalled;
                break;
            }

            beta = directives.cooling.next_beta(iter + 1, beta);
        }

        trace.status = status;
        finish(status, start_time, &mut reporter);
        Ok(trace)
    }
}

/// Inverts `observed` with a fresh single-threaded solver.
pub fn invert(
    kernel: &Kernel,
    observed: &[f64],
    uncertainty: &[f64],
    options: &InversionOptions,
) -> Result<Trace, InversionError> {
    let mut solver = TikhonovSolver::new(kernel.ndata(), kernel.ncells(), Parallelism::None)?;
    solver.solve(kernel, observed, uncertainty, options, None)
}

/// Fills `[W (G m - d); sqrt(beta) R (m - m_ref)]` and returns its squared norm.
fn stacked_residuals(
    misfit: &DataMisfit<'_>,
    reg: &Tikhonov,
    beta: f64,
    model: &[f64],
    predicted: &mut [f64],
    out: &mut [f64],
) -> f64 {
    misfit.kernel().apply_into(model, predicted);
    let (data, regularization) = out.split_at_mut(misfit.ndata());
    misfit.weighted_residuals(predicted, data);
    reg.scaled_residuals(model, beta, regularization);
    dot(out, out)
}

/// Decrease of `||r + J p||^2` below `||r||^2` for a step solving
/// `(J^T J + lambda I) p = -J^T r`.
fn predicted_decrease(step: &[f64], gradient: &[f64], lambda: f64) -> f64 {
    lambda * dot(step, step) - dot(step, gradient)
}

fn clamp_lambda(lambda: f64, options: &InversionOptions) -> f64 {
    lambda
        .max(options.lambda_min)
        .min(options.lambda_max)
        .max(f64::MIN_POSITIVE)
}

fn update_lambda(lambda: f64, rho: f64) -> f64 {
    if rho > 0.0 {
        let t = 1.0 - (2.0 * rho - 1.0).powi(3);
        lambda * t.max(1.0 / 3.0)
    } else {
        lambda * 2.0
    }
}

fn l2_norm(x: &[f64]) -> f64 {
    dot(x, x).sqrt()
}

fn max_abs(x: &[f64]) -> f64 {
    let mut max = 0.0;
    for &v in x {
        let v = v.abs();
        if v > max {
            max = v;
        }
    }
    max
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{:.3} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.3} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.3} us", secs * 1e6)
    } else {
        format!("{:.0} ns", secs * 1e9)
    }
}

fn finish(
    status: InversionStatus,
    start_time: Option<Instant>,
    reporter: &mut ReporterSlot<'_>,
) {
    if let Some(reporter) = reporter.as_mut() {
        reporter.on_finish(status);
    }
    if let Some(start) = start_time {
        let elapsed = format_duration(start.elapsed());
        emit_line(&format!("time: {elapsed}"));
    }
}

fn numerical_failure(
    iteration: usize,
    mut trace: Trace,
    start_time: Option<Instant>,
    reporter: &mut ReporterSlot<'_>,
) -> InversionError {
    log::warn!("non-finite objective or step at iteration {iteration}");
    trace.status = InversionStatus::NumericalFailure;
    finish(trace.status, start_time, reporter);
    InversionError::NumericalFailure {
        iteration,
        trace: Box::new(trace),
    }
}

fn compute_gradient(
    grad: &mut [f64],
    pattern: &StackedPattern,
    values: &[f64],
    residuals: &[f64],
) {
    grad.fill(0.0);
    let ncols = pattern.ncols();
    for col in 0..ncols {
        let start = pattern.col_ptrs()[col];
        let end = pattern.damping_positions()[col];
        let mut sum = 0.0;
        for idx in start..end {
            let row = pattern.row_indices()[idx];
            sum += values[idx] * residuals[row];
        }
        grad[col] = sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelParams, build_kernel};

    fn scalar_kernel() -> Kernel {
        build_kernel(&KernelParams {
            ndata: 1,
            ncells: 1,
            ..KernelParams::default()
        })
        .unwrap()
    }

    #[test]
    fn solves_scalar_problem() {
        // phi = (m - 2)^2 / 4 + beta m^2 with beta0 = 1/4, minimized at m = 1.
        let kernel = scalar_kernel();
        let trace = invert(&kernel, &[2.0], &[2.0], &InversionOptions::default()).unwrap();
        assert_eq!(trace.status, InversionStatus::TargetReached);
        assert_eq!(trace.target_iteration, Some(0));
        assert!(trace.phi_d[0] <= trace.target_misfit);
        assert!(trace.final_model()[0] > 0.5);
    }

    #[test]
    fn scalar_problem_reaches_tikhonov_minimizer() {
        // G = 1, sigma = 1, h = 1: beta0 = ratio, minimizer m = d / (1 + beta).
        let kernel = scalar_kernel();
        let options = InversionOptions {
            max_iter: 50,
            rms: 1e-6,
            beta0_ratio: 1.0,
            alpha_x: 0.0,
            ..InversionOptions::default()
        };
        let trace = invert(&kernel, &[2.0], &[1.0], &options).unwrap();
        assert!(matches!(
            trace.status,
            InversionStatus::Stalled | InversionStatus::MaxIterations
        ));
        assert!(trace.target_iteration.is_none());
        assert!((trace.betas[0] - 1.0).abs() < 1e-12);
        assert!((trace.final_model()[0] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn damping_rows_leave_gradient_untouched() {
        let pattern = StackedPattern::new(1, 2);
        let mut values = vec![0.0; pattern.nnz()];
        pattern.fill_regularization(&mut values, 1.0, 1.0);
        pattern.fill_damping(&mut values, 100.0);
        let residuals = vec![1.0; pattern.residual_rows()];
        let mut grad = vec![0.0; 2];
        compute_gradient(&mut grad, &pattern, &values, &residuals);
        // data entries are zero; smallness + one face entry each
        assert_eq!(grad, vec![0.0, 2.0]);
    }

    #[test]
    fn predicted_decrease_matches_linear_model() {
        // J = 2, r = 3, lambda = 0.5: p = -J r / (J^2 + lambda).
        let (j, r, lambda): (f64, f64, f64) = (2.0, 3.0, 0.5);
        let step = [-j * r / (j * j + lambda)];
        let gradient = [j * r];
        let linear = r * r - (r + j * step[0]).powi(2);
        let predicted = predicted_decrease(&step, &gradient, lambda);
        assert!((predicted - linear).abs() < 1e-12);
        assert!((predicted - 80.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn gain_ratio_is_one_on_linear_problem() {
        let kernel = scalar_kernel();
        let mut solver = TikhonovSolver::new(1, 1, Parallelism::None).unwrap();
        let mut reporter = LambdaReporter::default();
        let options = InversionOptions {
            max_iter: 3,
            rms: 1e-6,
            alpha_x: 0.0,
            ..InversionOptions::default()
        };
        solver
            .solve(&kernel, &[2.0], &[1.0], &options, Some(&mut reporter))
            .unwrap();
        // rho == 1 gives the strongest reduction, lambda / 3, on every accepted step.
        assert_eq!(reporter.lambdas.len(), 3);
        for pair in reporter.lambdas.windows(2) {
            assert!((pair[1] - pair[0] / 3.0).abs() <= 1e-12 * pair[0]);
        }
    }

    #[derive(Default)]
    struct LambdaReporter {
        lambdas: Vec<f64>,
    }

    impl Reporter for LambdaReporter {
        fn on_iteration(&mut self, report: &IterationReport) {
            assert!(report.accepted);
            self.lambdas.push(report.lambda);
        }
    }

    #[test]
    fn rejects_mismatched_kernel() {
        let kernel = scalar_kernel();
        let mut solver = TikhonovSolver::new(2, 1, Parallelism::None).unwrap();
        let err = solver
            .solve(&kernel, &[1.0], &[1.0], &InversionOptions::default(), None)
            .unwrap_err();
        assert!(matches!(
            err,
            InversionError::InvalidConfiguration(ConfigError::LengthMismatch { .. })
        ));
    }
}
