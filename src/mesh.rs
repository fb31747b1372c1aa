use crate::error::ConfigError;

/// Uniform cell-centered discretization of the unit interval.
#[derive(Debug, Clone, PartialEq)]
pub struct Discretization {
    cell_width: f64,
    centers: Vec<f64>,
}

impl Discretization {
    /// Splits [0, 1] into `ncells` equal cells.
    pub fn unit_interval(ncells: usize) -> Result<Self, ConfigError> {
        if ncells == 0 {
            return Err(ConfigError::EmptyDimension {
                what: "number of cells",
            });
        }
        let cell_width = 1.0 / ncells as f64;
        let centers = (0..ncells)
            .map(|j| (j as f64 + 0.5) * cell_width)
            .collect();
        Ok(Self {
            cell_width,
            centers,
        })
    }

    /// Number of cells (model parameters).
    pub fn ncells(&self) -> usize {
        self.centers.len()
    }

    /// Width h of every cell.
    pub fn cell_width(&self) -> f64 {
        self.cell_width
    }

    /// Cell-center coordinates in increasing order.
    pub fn centers(&self) -> &[f64] {
        &self.centers
    }
}
