use faer_core::sparse::SymbolicSparseColMatRef;

use crate::kernel::Kernel;
use crate::regularization::regularization_rows;

/// Column-compressed layout of the stacked Gauss-Newton system
///
/// ```text
/// [ W G          ]       [ -W (G m - d)            ]
/// [ sqrt(b) R_s  ] p  =  [ -sqrt(b) R_s (m - m_ref) ]
/// [ sqrt(b) R_x  ]       [ -sqrt(b) R_x (m - m_ref) ]
/// [ sqrt(l) I    ]       [ 0                        ]
/// ```
///
/// Rows are ordered data, smallness (one per cell), smoothness (one per interior face)
/// and damping (one per cell). Each column holds the full dense kernel column followed
/// by its regularization entries and ends with its damping entry, so row indices stay
/// sorted.
#[derive(Debug)]
pub(crate) struct StackedPattern {
    ndata: usize,
    ncols: usize,
    col_ptrs: Vec<usize>,
    row_indices: Vec<usize>,
    smallness_positions: Vec<usize>,
    damping_positions: Vec<usize>,
}

impl StackedPattern {
    pub(crate) fn new(ndata: usize, ncells: usize) -> Self {
        let ncols = ncells;
        let smooth_start = ndata + ncells;
        let damping_start = ndata + regularization_rows(ncells);

        let mut col_ptrs = Vec::with_capacity(ncols + 1);
        let mut row_indices = Vec::new();
        let mut smallness_positions = Vec::with_capacity(ncols);
        let mut damping_positions = Vec::with_capacity(ncols);
        col_ptrs.push(0);
        for col in 0..ncols {
            row_indices.extend(0..ndata);
            smallness_positions.push(row_indices.len());
            row_indices.push(ndata + col);
            if col > 0 {
                row_indices.push(smooth_start + col - 1);
            }
            if col + 1 < ncols {
                row_indices.push(smooth_start + col);
            }
            damping_positions.push(row_indices.len());
            row_indices.push(damping_start + col);
            col_ptrs.push(row_indices.len());
        }

        Self {
            ndata,
            ncols,
            col_ptrs,
            row_indices,
            smallness_positions,
            damping_positions,
        }
    }

    /// Total rows including the damping block.
    pub(crate) fn nrows(&self) -> usize {
        self.residual_rows() + self.ncols
    }

    /// Rows of the undamped system, i.e. the length of the residual vector.
    pub(crate) fn residual_rows(&self) -> usize {
        self.ndata + regularization_rows(self.ncols)
    }

    pub(crate) fn ndata(&self) -> usize {
        self.ndata
    }

    pub(crate) fn ncols(&self) -> usize {
        self.ncols
    }

    pub(crate) fn nnz(&self) -> usize {
        self.row_indices.len()
    }

    pub(crate) fn col_ptrs(&self) -> &[usize] {
        &self.col_ptrs
    }

    pub(crate) fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    pub(crate) fn damping_positions(&self) -> &[usize] {
        &self.damping_positions
    }

    /// Writes `W G` into the data block of every column.
    pub(crate) fn fill_data(&self, values: &mut [f64], kernel: &Kernel, weights: &[f64]) {
        for col in 0..self.ncols {
            let start = self.col_ptrs[col];
            for (row, w) in weights.iter().enumerate() {
                values[start + row] = w * kernel.get(row, col);
            }
        }
    }

    /// Writes the smallness coefficient `ws` and the smoothness difference `wx` into
    /// every column.
    pub(crate) fn fill_regularization(&self, values: &mut [f64], ws: f64, wx: f64) {
        for col in 0..self.ncols {
            let mut pos = self.smallness_positions[col];
            values[pos] = ws;
            if col > 0 {
                pos += 1;
                values[pos] = wx;
            }
            if col + 1 < self.ncols {
                pos += 1;
                values[pos] = -wx;
            }
        }
    }

    /// Writes the Levenberg-Marquardt damping `sqrt(lambda)` into every column.
    pub(crate) fn fill_damping(&self, values: &mut [f64], diag: f64) {
        for &pos in &self.damping_positions {
            values[pos] = diag;
        }
    }

    pub(crate) fn as_symbolic(&self) -> SymbolicSparseColMatRef<'_, usize> {
        unsafe {
            SymbolicSparseColMatRef::new_unchecked(
                self.nrows(),
                self.ncols,
                &self.col_ptrs,
                None,
                &self.row_indices,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_sorted_and_in_bounds() {
        let pattern = StackedPattern::new(3, 5);
        assert_eq!(pattern.nrows(), 3 + 5 + 4 + 5);
        for col in 0..pattern.ncols() {
            let range = pattern.col_ptrs()[col]..pattern.col_ptrs()[col + 1];
            let rows = &pattern.row_indices()[range];
            assert!(rows.windows(2).all(|w| w[0] < w[1]), "col {col}: {rows:?}");
            assert!(rows.iter().all(|&r| r < pattern.nrows()));
            assert_eq!(*rows.last().unwrap(), pattern.residual_rows() + col);
        }
    }

    #[test]
    fn entry_count() {
        // every column: 3 data + 1 smallness + 1 damping, plus 2 * (5 - 1) face entries
        let pattern = StackedPattern::new(3, 5);
        assert_eq!(pattern.nnz(), 5 * 5 + 8);
    }

    #[test]
    fn single_cell() {
        let pattern = StackedPattern::new(1, 1);
        assert_eq!(pattern.nrows(), 3);
        assert_eq!(pattern.row_indices(), &[0, 1, 2]);
        assert_eq!(pattern.damping_positions(), &[2]);
    }

    #[test]
    fn regularization_block_is_a_difference_operator() {
        let pattern = StackedPattern::new(0, 3);
        let mut values = vec![0.0; pattern.nnz()];
        pattern.fill_regularization(&mut values, 1.0, 2.0);
        // dense view of the undamped block, rows x cols
        let mut dense = vec![[0.0; 3]; pattern.residual_rows()];
        for col in 0..3 {
            for idx in pattern.col_ptrs()[col]..pattern.damping_positions()[col] {
                dense[pattern.row_indices()[idx]][col] = values[idx];
            }
        }
        assert_eq!(dense[0], [1.0, 0.0, 0.0]);
        assert_eq!(dense[3], [-2.0, 2.0, 0.0]);
        assert_eq!(dense[4], [0.0, -2.0, 2.0]);
    }
}
