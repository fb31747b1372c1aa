//! Policies applied around the iteration loop: the initial trade-off estimate, the
//! cooling schedule and the discrepancy-principle stopping rule.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::{ConfigError, require_range};
use crate::kernel::dot;
use crate::misfit::DataMisfit;
use crate::regularization::Tikhonov;

/// Initial beta from the ratio of the largest Hessian eigenvalues.
///
/// `beta0 = ratio * lmax(G^T W^2 G) / lmax(H_m)`, both eigenvalues estimated by power
/// iteration from the same seeded standard-normal start vector.
#[derive(Debug, Clone)]
pub struct BetaEstimate {
    pub ratio: f64,
    pub power_iterations: usize,
    pub seed: u64,
}

impl BetaEstimate {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_range("beta0_ratio", self.ratio, "beta0_ratio >= 0", self.ratio >= 0.0)?;
        if self.power_iterations == 0 {
            return Err(ConfigError::EmptyDimension {
                what: "beta power iterations",
            });
        }
        Ok(())
    }

    /// Returns beta0; zero when the regularization has no curvature.
    pub fn estimate(&self, misfit: &DataMisfit<'_>, reg: &Tikhonov) -> f64 {
        let n = reg.ncells();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let start: Vec<f64> = (0..n).map(|_| rng.sample(StandardNormal)).collect();

        let mut scratch = vec![0.0; misfit.ndata()];
        let data_eig = power_iteration(&start, self.power_iterations, |v, out| {
            misfit.hessian_apply(v, &mut scratch, out)
        });
        let reg_eig = power_iteration(&start, self.power_iterations, |v, out| {
            reg.hessian_apply(v, out)
        });

        if reg_eig <= 0.0 || !reg_eig.is_finite() {
            log::warn!("regularization has no curvature (lmax = {reg_eig:e}); using beta0 = 0");
            return 0.0;
        }
        let beta = self.ratio * data_eig / reg_eig;
        log::debug!("beta0 = {beta:.4e} (lmax data {data_eig:.4e}, lmax reg {reg_eig:.4e})");
        beta
    }
}

/// Rayleigh quotient of `apply` after `iterations` normalized power steps.
fn power_iteration(
    start: &[f64],
    iterations: usize,
    mut apply: impl FnMut(&[f64], &mut [f64]),
) -> f64 {
    let mut v = start.to_vec();
    let mut w = vec![0.0; v.len()];
    normalize(&mut v);
    for _ in 0..iterations {
        apply(&v, &mut w);
        if normalize(&mut w) == 0.0 {
            return 0.0;
        }
        core::mem::swap(&mut v, &mut w);
    }
    apply(&v, &mut w);
    dot(&v, &w)
}

fn normalize(v: &mut [f64]) -> f64 {
    let norm = dot(v, v).sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    norm
}

/// How beta evolves between outer iterations.
pub trait BetaCooling {
    /// Beta to use after `completed` iterations (1-based count) given the current value.
    fn next_beta(&self, completed: usize, beta: f64) -> f64;
}

/// Divide beta by `cooling_factor` after every `cooling_rate` iterations.
#[derive(Debug, Clone)]
pub struct BetaSchedule {
    pub cooling_factor: f64,
    pub cooling_rate: usize,
}

impl BetaSchedule {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_range(
            "cooling_factor",
            self.cooling_factor,
            "cooling_factor >= 1",
            self.cooling_factor >= 1.0,
        )?;
        if self.cooling_rate == 0 {
            return Err(ConfigError::EmptyDimension {
                what: "cooling rate",
            });
        }
        Ok(())
    }
}

impl BetaCooling for BetaSchedule {
    fn next_beta(&self, completed: usize, beta: f64) -> f64 {
        if self.cooling_factor == 1.0 || completed % self.cooling_rate != 0 {
            return beta;
        }
        let cooled = beta / self.cooling_factor;
        log::debug!("iteration {completed}: beta {beta:.4e} -> {cooled:.4e}");
        cooled
    }
}

/// Discrepancy principle: stop once `phi_d <= chifact * ndata`, `chifact = rms^2`.
#[derive(Debug, Clone)]
pub struct TargetMisfit {
    pub rms: f64,
}

impl TargetMisfit {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_range("rms", self.rms, "rms > 0", self.rms > 0.0)
    }

    pub fn chifact(&self) -> f64 {
        self.rms * self.rms
    }

    pub fn target(&self, ndata: usize) -> f64 {
        self.chifact() * ndata as f64
    }

    pub fn reached(&self, phi_d: f64, ndata: usize) -> bool {
        phi_d <= self.target(ndata)
    }
}

/// The policies one inversion run is driven by.
pub struct Directives {
    pub beta_estimate: BetaEstimate,
    pub cooling: Box<dyn BetaCooling>,
    pub target: TargetMisfit,
}

impl Directives {
    pub fn new(
        beta_estimate: BetaEstimate,
        cooling: impl BetaCooling + 'static,
        target: TargetMisfit,
    ) -> Result<Self, ConfigError> {
        beta_estimate.validate()?;
        target.validate()?;
        Ok(Self {
            beta_estimate,
            cooling: Box::new(cooling),
            target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelParams, build_kernel};

    #[test]
    fn schedule_cools_every_rate_iterations() {
        let schedule = BetaSchedule {
            cooling_factor: 2.0,
            cooling_rate: 3,
        };
        assert_eq!(schedule.next_beta(1, 8.0), 8.0);
        assert_eq!(schedule.next_beta(2, 8.0), 8.0);
        assert_eq!(schedule.next_beta(3, 8.0), 4.0);
        assert_eq!(schedule.next_beta(6, 4.0), 2.0);
    }

    #[test]
    fn unit_factor_disables_cooling() {
        let schedule = BetaSchedule {
            cooling_factor: 1.0,
            cooling_rate: 1,
        };
        assert_eq!(schedule.next_beta(1, 8.0), 8.0);
    }

    #[test]
    fn schedule_validation() {
        let warm = BetaSchedule {
            cooling_factor: 0.5,
            cooling_rate: 1,
        };
        assert!(warm.validate().is_err());
        let never = BetaSchedule {
            cooling_factor: 2.0,
            cooling_rate: 0,
        };
        assert!(never.validate().is_err());
    }

    #[test]
    fn target_is_chifact_times_ndata() {
        let target = TargetMisfit { rms: 2.0 };
        assert_eq!(target.target(20), 80.0);
        assert!(target.reached(80.0, 20));
        assert!(!target.reached(80.1, 20));
        assert!(TargetMisfit { rms: 0.0 }.validate().is_err());
    }

    #[test]
    fn power_iteration_finds_dominant_eigenvalue() {
        let diag = [1.0, 5.0, 2.0];
        let eig = power_iteration(&[1.0, 1.0, 1.0], 200, |v, out| {
            for ((o, x), d) in out.iter_mut().zip(v).zip(&diag) {
                *o = d * x;
            }
        });
        assert!((eig - 5.0).abs() < 1e-9);
    }

    #[test]
    fn estimate_is_deterministic_and_scales_with_ratio() {
        let kernel = build_kernel(&KernelParams::default()).unwrap();
        let observed = vec![0.0; kernel.ndata()];
        let sigma = vec![0.1; kernel.ndata()];
        let misfit = DataMisfit::new(&kernel, &observed, &sigma).unwrap();
        let reg = Tikhonov::new(kernel.mesh(), 1.0, 1.0, vec![0.0; kernel.ncells()]).unwrap();
        let one = BetaEstimate {
            ratio: 1.0,
            power_iterations: 20,
            seed: 3,
        };
        let ten = BetaEstimate { ratio: 10.0, ..one.clone() };
        let b1 = one.estimate(&misfit, &reg);
        assert!(b1 > 0.0);
        assert_eq!(b1, one.estimate(&misfit, &reg));
        assert!((ten.estimate(&misfit, &reg) - 10.0 * b1).abs() <= 1e-9 * b1);
    }

    #[test]
    fn no_curvature_gives_zero_beta() {
        let kernel = build_kernel(&KernelParams {
            ndata: 2,
            ncells: 3,
            ..KernelParams::default()
        })
        .unwrap();
        let observed = vec![0.0; 2];
        let misfit = DataMisfit::new(&kernel, &observed, &[1.0, 1.0]).unwrap();
        let reg = Tikhonov::new(kernel.mesh(), 0.0, 0.0, vec![0.0; 3]).unwrap();
        let estimate = BetaEstimate {
            ratio: 1.0,
            power_iterations: 5,
            seed: 0,
        };
        assert_eq!(estimate.estimate(&misfit, &reg), 0.0);
    }
}
