use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets};

/// How an inversion run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InversionStatus {
    /// phi_d fell to the target misfit.
    TargetReached,
    /// The iteration budget ran out first.
    MaxIterations,
    /// The gradient or the step became negligible before the target was reached.
    Stalled,
    /// A reporter asked to stop.
    Cancelled,
    /// The objective or a step stopped being finite; only carried by the partial trace of
    /// `InversionError::NumericalFailure`.
    NumericalFailure,
}

#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: usize,
    pub beta: f64,
    pub phi_d: f64,
    pub phi_m: f64,
    pub phi: f64,
    pub lambda: f64,
    pub step_norm: f64,
    pub grad_inf: f64,
    pub accepted: bool,
}

/// One recorded outer iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot<'a> {
    pub iteration: usize,
    pub model: &'a [f64],
    pub prediction: &'a [f64],
    pub phi_d: f64,
    pub phi_m: f64,
}

const MAX_PREALLOCATED_ITERATIONS: usize = 64;

/// Everything an inversion run produced.
///
/// Per-iteration vectors are aligned: entry `i` belongs to outer iteration `i`
/// (zero-based) and describes the model accepted at the end of that iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub starting_model: Vec<f64>,
    pub models: Vec<Vec<f64>>,
    pub predictions: Vec<Vec<f64>>,
    pub phi_d: Vec<f64>,
    pub phi_m: Vec<f64>,
    pub phi_m_small: Vec<f64>,
    pub phi_m_smooth: Vec<f64>,
    /// Beta used during each iteration.
    pub betas: Vec<f64>,
    /// Total objective `phi_d + beta * phi_m` after each iteration.
    pub phi: Vec<f64>,
    /// `rms^2 * ndata`.
    pub target_misfit: f64,
    /// First iteration whose phi_d reached `target_misfit`.
    pub target_iteration: Option<usize>,
    pub status: InversionStatus,
}

impl Trace {
    /// `max_iter` only bounds the preallocation; the vectors grow past it as needed.
    pub(crate) fn new(starting_model: Vec<f64>, target_misfit: f64, max_iter: usize) -> Self {
        let capacity = max_iter.min(MAX_PREALLOCATED_ITERATIONS);
        Self {
            starting_model,
            models: Vec::with_capacity(capacity),
            predictions: Vec::with_capacity(capacity),
            phi_d: Vec::with_capacity(capacity),
            phi_m: Vec::with_capacity(capacity),
            phi_m_small: Vec::with_capacity(capacity),
            phi_m_smooth: Vec::with_capacity(capacity),
            betas: Vec::with_capacity(capacity),
            phi: Vec::with_capacity(capacity),
            target_misfit,
            target_iteration: None,
            status: InversionStatus::MaxIterations,
        }
    }

    /// Number of completed outer iterations.
    pub fn iterations(&self) -> usize {
        self.models.len()
    }

    pub fn reached_target(&self) -> bool {
        self.target_iteration.is_some()
    }

    /// Last accepted model, or the starting model when no iteration completed.
    pub fn final_model(&self) -> &[f64] {
        self.models.last().unwrap_or(&self.starting_model)
    }

    /// Predicted data of the last iteration.
    pub fn final_prediction(&self) -> Option<&[f64]> {
        self.predictions.last().map(Vec::as_slice)
    }

    /// Iteration `iteration`, clamped to the last recorded one.
    pub fn snapshot(&self, iteration: usize) -> Option<Snapshot<'_>> {
        let last = self.iterations().checked_sub(1)?;
        let i = if iteration > last {
            log::warn!("iteration {iteration} is past the last recorded iteration {last}");
            last
        } else {
            iteration
        };
        Some(Snapshot {
            iteration: i,
            model: &self.models[i],
            prediction: &self.predictions[i],
            phi_d: self.phi_d[i],
            phi_m: self.phi_m[i],
        })
    }

    /// (phi_m, phi_d) pairs in iteration order.
    pub fn tikhonov_curve(&self) -> Vec<(f64, f64)> {
        self.phi_m
            .iter()
            .copied()
            .zip(self.phi_d.iter().copied())
            .collect()
    }
}

pub(crate) fn emit_line(line: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{line}");
    } else {
        println!("{line}");
    }
}

/// Observer of the iteration loop.
pub trait Reporter {
    fn on_iteration(&mut self, report: &IterationReport);
    fn on_finish(&mut self, _status: InversionStatus) {}
    /// Checked before every outer iteration; returning false cancels the run.
    fn keep_going(&mut self) -> bool {
        true
    }
}

pub struct StdoutReporter {
    rows: Vec<IterationReport>,
}

impl StdoutReporter {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for StdoutReporter {
    fn on_iteration(&mut self, report: &IterationReport) {
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self, status: InversionStatus) {
        if self.rows.is_empty() {
            return;
        }
        if !log::log_enabled!(log::Level::Info) {
            println!();
        }
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("iter").set_alignment(CellAlignment::Right),
            Cell::new("beta").set_alignment(CellAlignment::Right),
            Cell::new("phi_d").set_alignment(CellAlignment::Right),
            Cell::new("phi_m").set_alignment(CellAlignment::Right),
            Cell::new("phi").set_alignment(CellAlignment::Right),
            Cell::new("lambda").set_alignment(CellAlignment::Right),
            Cell::new("step").set_alignment(CellAlignment::Right),
            Cell::new("grad").set_alignment(CellAlignment::Right),
            Cell::new("accepted"),
        ]);
        for row in &self.rows {
            table.add_row(vec![
                Cell::new(row.iteration).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3e}", row.beta)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.phi_d)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.phi_m)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.phi)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.lambda)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.step_norm)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.grad_inf)).set_alignment(CellAlignment::Right),
                Cell::new(if row.accepted { "yes" } else { "no" }),
            ]);
        }

        for line in table.to_string().lines() {
            emit_line(line);
        }
        emit_line(&format!("status: {status:?}"));
        self.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace_with(phi_d: &[f64]) -> Trace {
        let mut trace = Trace::new(vec![0.0; 2], 1.0, phi_d.len());
        for (i, &p) in phi_d.iter().enumerate() {
            trace.models.push(vec![i as f64; 2]);
            trace.predictions.push(vec![i as f64]);
            trace.phi_d.push(p);
            trace.phi_m.push(10.0 * i as f64);
        }
        trace
    }

    #[test]
    fn snapshot_clamps_past_the_end() {
        let trace = trace_with(&[4.0, 2.0, 1.0]);
        let snap = trace.snapshot(10).unwrap();
        assert_eq!(snap.iteration, 2);
        assert_eq!(snap.model, &[2.0, 2.0]);
        assert_eq!(snap.phi_d, 1.0);
        assert_eq!(trace.snapshot(1).unwrap().phi_m, 10.0);
    }

    #[test]
    fn empty_trace_falls_back_to_starting_model() {
        let trace = trace_with(&[]);
        assert!(trace.snapshot(0).is_none());
        assert_eq!(trace.final_model(), &[0.0, 0.0]);
        assert!(trace.final_prediction().is_none());
    }

    #[test]
    fn huge_budget_does_not_preallocate() {
        let trace = Trace::new(vec![0.0], 1.0, usize::MAX);
        assert!(trace.models.capacity() >= MAX_PREALLOCATED_ITERATIONS);
        assert!(trace.models.capacity() < 2 * MAX_PREALLOCATED_ITERATIONS);
        assert!(trace.phi.capacity() < 2 * MAX_PREALLOCATED_ITERATIONS);
    }

    #[test]
    fn tikhonov_curve_pairs_phi_m_with_phi_d() {
        let trace = trace_with(&[4.0, 2.0]);
        assert_eq!(trace.tikhonov_curve(), vec![(0.0, 4.0), (10.0, 2.0)]);
    }
}
