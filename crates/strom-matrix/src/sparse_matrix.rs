use std::collections::BTreeMap;
use std::fmt;

use faer::{
    Mat,
    sparse::{SparseColMat, Triplet},
};
use num_traits::Signed;

/// Scalar types the kernel is instantiated at: `i32` for incidence and
/// topology matrices, `f64` for coefficient matrices.
pub trait Scalar: Copy + PartialOrd + Signed + fmt::Display {}

impl<T: Copy + PartialOrd + Signed + fmt::Display> Scalar for T {}

/// A sparse matrix stored row-major as one ordered map per row.
///
/// Structural zeros are never stored: every mutating operation prunes
/// entries that become zero, so `nnz` and column scans only ever see
/// genuine nonzeros.
#[derive(Clone, PartialEq)]
pub struct SparseMat<T> {
    nrows: usize,
    ncols: usize,
    rows: Vec<BTreeMap<usize, T>>,
}

impl<T: Scalar> SparseMat<T> {
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            rows: vec![BTreeMap::new(); nrows],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut mat = Self::zeros(n, n);
        for i in 0..n {
            mat.rows[i].insert(i, T::one());
        }
        mat
    }

    /// Builds a matrix from triplets. Duplicate positions are summed and
    /// entries that sum to zero are dropped, so a `(+1, -1)` pair at the
    /// same position leaves a structural zero behind.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[Triplet<usize, usize, T>]) -> Self {
        let mut mat = Self::zeros(nrows, ncols);
        for &Triplet { row, col, val } in triplets {
            assert!(row < nrows && col < ncols, "triplet out of bounds");
            let sum = mat.get(row, col) + val;
            mat.insert(row, col, sum);
        }
        mat
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.rows.iter().map(BTreeMap::len).sum()
    }

    pub fn get(&self, row: usize, col: usize) -> T {
        assert!(row < self.nrows && col < self.ncols, "index out of bounds");
        self.rows[row].get(&col).copied().unwrap_or_else(T::zero)
    }

    /// Sets a single entry. Writing an exact zero removes the entry.
    pub fn insert(&mut self, row: usize, col: usize, value: T) {
        assert!(row < self.nrows && col < self.ncols, "index out of bounds");
        if value.is_zero() {
            self.rows[row].remove(&col);
        } else {
            self.rows[row].insert(col, value);
        }
    }

    /// All nonzero entries in row-major order.
    pub fn triplets(&self) -> Vec<Triplet<usize, usize, T>> {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(row, entries)| {
                entries
                    .iter()
                    .map(move |(&col, &val)| Triplet::new(row, col, val))
            })
            .collect()
    }

    /// Block-diagonal assembly: each block occupies its own row and
    /// column range, in the order given.
    pub fn block_diag(blocks: &[&Self]) -> Self {
        let nrows = blocks.iter().map(|b| b.nrows).sum();
        let ncols = blocks.iter().map(|b| b.ncols).sum();
        let mut mat = Self::zeros(nrows, ncols);
        let mut row_offset = 0;
        let mut col_offset = 0;
        for block in blocks {
            for (row, entries) in block.rows.iter().enumerate() {
                for (&col, &val) in entries {
                    mat.rows[row_offset + row].insert(col_offset + col, val);
                }
            }
            row_offset += block.nrows;
            col_offset += block.ncols;
        }
        mat
    }

    /// Vertical concatenation. All blocks must agree on the column count.
    pub fn vstack(blocks: &[&Self]) -> Self {
        let ncols = blocks.first().map_or(0, |b| b.ncols);
        assert!(
            blocks.iter().all(|b| b.ncols == ncols),
            "vstack blocks differ in column count"
        );
        let nrows = blocks.iter().map(|b| b.nrows).sum();
        let mut mat = Self::zeros(nrows, ncols);
        let mut row_offset = 0;
        for block in blocks {
            for (row, entries) in block.rows.iter().enumerate() {
                mat.rows[row_offset + row] = entries.clone();
            }
            row_offset += block.nrows;
        }
        mat
    }

    pub fn transpose(&self) -> Self {
        let mut mat = Self::zeros(self.ncols, self.nrows);
        for (row, entries) in self.rows.iter().enumerate() {
            for (&col, &val) in entries {
                mat.rows[col].insert(row, val);
            }
        }
        mat
    }

    /// The submatrix made of the given columns, in the given order.
    pub fn select_cols(&self, cols: &[usize]) -> Self {
        let mut mat = Self::zeros(self.nrows, cols.len());
        for (new_col, &col) in cols.iter().enumerate() {
            assert!(col < self.ncols, "column out of bounds");
            for (row, val) in self.col_nonzeros(col) {
                mat.rows[row].insert(new_col, val);
            }
        }
        mat
    }

    /// The submatrix made of the first `n` rows.
    pub fn top_rows(&self, n: usize) -> Self {
        assert!(n <= self.nrows, "row count out of bounds");
        Self {
            nrows: n,
            ncols: self.ncols,
            rows: self.rows[..n].to_vec(),
        }
    }

    pub fn row_swap(&mut self, a: usize, b: usize) {
        self.rows.swap(a, b);
    }

    pub fn row_neg(&mut self, row: usize) {
        for val in self.rows[row].values_mut() {
            *val = -*val;
        }
    }

    /// `row dst += row src`, pruning entries that cancel.
    pub fn row_add(&mut self, dst: usize, src: usize) {
        let src_row = self.rows[src].clone();
        let dst_row = &mut self.rows[dst];
        for (col, val) in src_row {
            let sum = dst_row.get(&col).copied().unwrap_or_else(T::zero) + val;
            if sum.is_zero() {
                dst_row.remove(&col);
            } else {
                dst_row.insert(col, sum);
            }
        }
    }

    /// `row dst -= row src`, pruning entries that cancel.
    pub fn row_sub(&mut self, dst: usize, src: usize) {
        let src_row = self.rows[src].clone();
        let dst_row = &mut self.rows[dst];
        for (col, val) in src_row {
            let diff = dst_row.get(&col).copied().unwrap_or_else(T::zero) - val;
            if diff.is_zero() {
                dst_row.remove(&col);
            } else {
                dst_row.insert(col, diff);
            }
        }
    }

    /// Nonzero entries of one column, in ascending row order.
    pub fn col_nonzeros(&self, col: usize) -> Vec<(usize, T)> {
        assert!(col < self.ncols, "column out of bounds");
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(row, entries)| entries.get(&col).map(|&val| (row, val)))
            .collect()
    }

    pub fn col_sum(&self, col: usize) -> T {
        self.col_nonzeros(col)
            .into_iter()
            .fold(T::zero(), |acc, (_, val)| acc + val)
    }
}

impl SparseMat<f64> {
    pub fn to_sparse_col_mat(&self) -> SparseColMat<usize, f64> {
        SparseColMat::try_new_from_triplets(self.nrows, self.ncols, &self.triplets()).unwrap()
    }

    pub fn to_dense_mat(&self) -> Mat<f64> {
        Mat::from_fn(self.nrows, self.ncols, |row, col| self.get(row, col))
    }
}

impl<T: Scalar> fmt::Display for SparseMat<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.nrows {
            for col in 0..self.ncols {
                write!(f, "{:>8} ", self.get(row, col))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl<T: Scalar> fmt::Debug for SparseMat<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SparseMat ({}x{})", self.nrows, self.ncols)?;
        write!(f, "{self}")
    }
}
