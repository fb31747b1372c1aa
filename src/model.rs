use crate::error::{ConfigError, require_range};
use crate::mesh::Discretization;

/// Ground-truth model: constant background, a box anomaly and a Gaussian bump.
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub background: f64,
    pub box_amplitude: f64,
    pub box_center: f64,
    /// Full width of the box; cells with centers in `[center - width/2, center + width/2]`
    /// receive the amplitude.
    pub box_width: f64,
    pub bump_amplitude: f64,
    pub bump_center: f64,
    /// Standard deviation of the bump; must be positive.
    pub bump_sigma: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            background: 0.0,
            box_amplitude: 1.0,
            box_center: 0.2,
            box_width: 0.2,
            bump_amplitude: -1.0,
            bump_center: 0.5,
            bump_sigma: 1.0,
        }
    }
}

/// Samples the ground-truth model at every cell center of `mesh`.
pub fn build_true_model(
    mesh: &Discretization,
    params: &ModelParams,
) -> Result<Vec<f64>, ConfigError> {
    require_range("background", params.background, "finite value", true)?;
    require_range("box_amplitude", params.box_amplitude, "finite value", true)?;
    require_range("box_center", params.box_center, "finite value", true)?;
    require_range("box_width", params.box_width, "box_width >= 0", params.box_width >= 0.0)?;
    require_range("bump_amplitude", params.bump_amplitude, "finite value", true)?;
    require_range("bump_center", params.bump_center, "finite value", true)?;
    require_range("bump_sigma", params.bump_sigma, "bump_sigma > 0", params.bump_sigma > 0.0)?;

    let lo = params.box_center - 0.5 * params.box_width;
    let hi = params.box_center + 0.5 * params.box_width;
    let model = mesh
        .centers()
        .iter()
        .map(|&x| {
            let mut m = params.background;
            if x >= lo && x <= hi {
                m += params.box_amplitude;
            }
            m + params.bump_amplitude * gaussian(x, params.bump_center, params.bump_sigma)
        })
        .collect();
    Ok(model)
}

fn gaussian(x: f64, center: f64, sigma: f64) -> f64 {
    let z = (x - center) / sigma;
    (-0.5 * z * z).exp()
}
