use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::{ConfigError, require_finite, require_range};
use crate::kernel::Kernel;

/// Noise and uncertainty settings for synthetic data.
#[derive(Debug, Clone)]
pub struct NoiseOptions {
    /// Add random noise to the simulated data.
    pub add_noise: bool,
    /// Relative noise level, also the relative part of the uncertainty.
    pub percentage: f64,
    /// Absolute noise level, also the absolute part of the uncertainty.
    pub floor: f64,
    /// Seed for the noise generator; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for NoiseOptions {
    fn default() -> Self {
        Self {
            add_noise: false,
            percentage: 0.05,
            floor: 0.1,
            seed: None,
        }
    }
}

/// Observed data and the standard deviations assigned to them.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticData {
    pub data: Vec<f64>,
    pub uncertainty: Vec<f64>,
}

/// Simulates data G·model, optionally corrupted with noise.
///
/// Each noisy sample is `d + |d| * percentage * z1 + floor * z2` with independent
/// standard-normal `z1`, `z2`. The uncertainty is `percentage * |d| + floor` evaluated on
/// the returned data.
pub fn simulate(
    kernel: &Kernel,
    model: &[f64],
    noise: &NoiseOptions,
) -> Result<SyntheticData, ConfigError> {
    if model.len() != kernel.ncells() {
        return Err(ConfigError::LengthMismatch {
            what: "model",
            expected: kernel.ncells(),
            actual: model.len(),
        });
    }
    require_finite("model", model)?;
    validate_noise(noise)?;

    let mut data = kernel.apply(model);
    if noise.add_noise {
        let mut rng = match noise.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        for d in data.iter_mut() {
            let relative: f64 = rng.sample(StandardNormal);
            let absolute: f64 = rng.sample(StandardNormal);
            *d += d.abs() * noise.percentage * relative + noise.floor * absolute;
        }
    }
    let uncertainty = uncertainty(&data, noise.percentage, noise.floor);
    Ok(SyntheticData { data, uncertainty })
}

/// Standard deviations `percentage * |d| + floor`.
pub fn uncertainty(data: &[f64], percentage: f64, floor: f64) -> Vec<f64> {
    data.iter().map(|d| percentage * d.abs() + floor).collect()
}

fn validate_noise(noise: &NoiseOptions) -> Result<(), ConfigError> {
    require_range(
        "percentage",
        noise.percentage,
        "percentage >= 0",
        noise.percentage >= 0.0,
    )?;
    require_range("floor", noise.floor, "floor >= 0", noise.floor >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelParams, build_kernel};

    fn small_kernel() -> Kernel {
        build_kernel(&KernelParams {
            ndata: 5,
            ncells: 8,
            ..KernelParams::default()
        })
        .unwrap()
    }

    #[test]
    fn noiseless_data_is_kernel_times_model() {
        let kernel = small_kernel();
        let model: Vec<f64> = (0..8).map(|j| j as f64 * 0.1).collect();
        let out = simulate(&kernel, &model, &NoiseOptions::default()).unwrap();
        assert_eq!(out.data, kernel.apply(&model));
        for (s, d) in out.uncertainty.iter().zip(&out.data) {
            assert!((s - (0.05 * d.abs() + 0.1)).abs() < 1e-15);
        }
    }

    #[test]
    fn seeded_noise_is_reproducible() {
        let kernel = small_kernel();
        let model = vec![1.0; 8];
        let noise = NoiseOptions {
            add_noise: true,
            seed: Some(7),
            ..NoiseOptions::default()
        };
        let a = simulate(&kernel, &model, &noise).unwrap();
        let b = simulate(&kernel, &model, &noise).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.data, kernel.apply(&model));
    }

    #[test]
    fn noise_is_relative_plus_floor_draws() {
        let kernel = small_kernel();
        let model: Vec<f64> = (0..8).map(|j| 1.0 - 0.3 * j as f64).collect();
        let clean = kernel.apply(&model);
        let noise = NoiseOptions {
            add_noise: true,
            percentage: 0.1,
            floor: 0.05,
            seed: Some(11),
        };
        let out = simulate(&kernel, &model, &noise).unwrap();

        let mut rng = StdRng::seed_from_u64(11);
        for (i, (&noisy, &d)) in out.data.iter().zip(&clean).enumerate() {
            let z1: f64 = rng.sample(StandardNormal);
            let z2: f64 = rng.sample(StandardNormal);
            assert_eq!(noisy, d + (d.abs() * 0.1 * z1 + 0.05 * z2), "sample {i}");
        }
        assert_eq!(out.uncertainty, uncertainty(&out.data, 0.1, 0.05));
    }

    #[test]
    fn zero_noise_levels_leave_data_unchanged() {
        let kernel = small_kernel();
        let model = vec![1.0; 8];
        let noise = NoiseOptions {
            add_noise: true,
            percentage: 0.0,
            floor: 0.0,
            seed: Some(3),
        };
        let out = simulate(&kernel, &model, &noise).unwrap();
        assert_eq!(out.data, kernel.apply(&model));
        assert!(out.uncertainty.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn rejects_wrong_model_length() {
        let kernel = small_kernel();
        let err = simulate(&kernel, &[0.0; 3], &NoiseOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::LengthMismatch {
                what: "model",
                expected: 8,
                actual: 3
            }
        );
    }

    #[test]
    fn rejects_negative_levels() {
        let kernel = small_kernel();
        let noise = NoiseOptions {
            floor: -0.1,
            ..NoiseOptions::default()
        };
        assert!(simulate(&kernel, &[0.0; 8], &noise).is_err());
    }
}
