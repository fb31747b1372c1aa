use crate::error::{ConfigError, require_finite};
use crate::kernel::Kernel;

/// Weighted L2 data misfit `phi_d(m) = ||W (G m - d)||^2` with `W = diag(1 / sigma)`.
#[derive(Debug, Clone)]
pub struct DataMisfit<'a> {
    kernel: &'a Kernel,
    observed: &'a [f64],
    weights: Vec<f64>,
}

impl<'a> DataMisfit<'a> {
    /// Validates the data and uncertainties against the kernel.
    pub fn new(
        kernel: &'a Kernel,
        observed: &'a [f64],
        uncertainty: &[f64],
    ) -> Result<Self, ConfigError> {
        let ndata = kernel.ndata();
        if observed.len() != ndata {
            return Err(ConfigError::LengthMismatch {
                what: "observed data",
                expected: ndata,
                actual: observed.len(),
            });
        }
        if uncertainty.len() != ndata {
            return Err(ConfigError::LengthMismatch {
                what: "uncertainty",
                expected: ndata,
                actual: uncertainty.len(),
            });
        }
        require_finite("observed data", observed)?;
        require_finite("uncertainty", uncertainty)?;
        if let Some(index) = uncertainty.iter().position(|&s| s <= 0.0) {
            return Err(ConfigError::NonPositiveUncertainty {
                index,
                value: uncertainty[index],
            });
        }

        Ok(Self {
            kernel,
            observed,
            weights: uncertainty.iter().map(|s| 1.0 / s).collect(),
        })
    }

    pub fn ndata(&self) -> usize {
        self.observed.len()
    }

    pub fn kernel(&self) -> &Kernel {
        self.kernel
    }

    /// Diagonal of W.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Writes `W (predicted - d)` into `out`.
    pub fn weighted_residuals(&self, predicted: &[f64], out: &mut [f64]) {
        for (((o, p), d), w) in out
            .iter_mut()
            .zip(predicted)
            .zip(self.observed)
            .zip(&self.weights)
        {
            *o = w * (p - d);
        }
    }

    /// phi_d for already-computed predicted data.
    pub fn phi(&self, predicted: &[f64]) -> f64 {
        let mut sum = 0.0;
        for ((p, d), w) in predicted.iter().zip(self.observed).zip(&self.weights) {
            let r = w * (p - d);
            sum += r * r;
        }
        sum
    }

    /// Writes `G^T W^2 G v` into `out`; `scratch` has one entry per datum.
    pub fn hessian_apply(&self, v: &[f64], scratch: &mut [f64], out: &mut [f64]) {
        self.kernel.apply_into(v, scratch);
        for (s, w) in scratch.iter_mut().zip(&self.weights) {
            *s *= w * w;
        }
        self.kernel.apply_transpose_into(scratch, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelParams, build_kernel};

    fn kernel() -> Kernel {
        build_kernel(&KernelParams {
            ndata: 3,
            ncells: 4,
            ..KernelParams::default()
        })
        .unwrap()
    }

    #[test]
    fn phi_weights_by_inverse_sigma() {
        let kernel = kernel();
        let observed = [1.0, 2.0, 3.0];
        let misfit = DataMisfit::new(&kernel, &observed, &[0.5, 1.0, 2.0]).unwrap();
        let phi = misfit.phi(&[2.0, 2.0, 1.0]);
        // (1/0.5)^2 + 0 + (2/2)^2
        assert!((phi - 5.0).abs() < 1e-15);
    }

    #[test]
    fn zero_uncertainty_is_rejected() {
        let kernel = kernel();
        let observed = [1.0, 2.0, 3.0];
        let err = DataMisfit::new(&kernel, &observed, &[0.5, 0.0, 2.0]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NonPositiveUncertainty {
                index: 1,
                value: 0.0
            }
        );
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let kernel = kernel();
        let observed = [1.0, 2.0];
        assert!(matches!(
            DataMisfit::new(&kernel, &observed, &[1.0, 1.0]),
            Err(ConfigError::LengthMismatch { .. })
        ));
    }
}
