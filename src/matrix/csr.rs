//! Compressed Sparse Row matrix in three-array form.
//!
//! The storage follows the classic `(A, ja, ia)` layout: `values` holds the
//! stored entries, `col_indices` the column of each entry, and
//! `row_pointers[i]..row_pointers[i + 1]` delimits row `i`. Explicit zeros
//! are legal stored entries and count towards `nnz`: the LU facade relies
//! on the structural pattern staying put even when values cancel.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{DaeError, MatrixError};
use crate::matrix_error;
use crate::scalar::Float;

#[derive(Debug, Clone, Default)]
pub struct CsrMatrix {
    nrows: usize,
    ncols: usize,
    values: Vec<Float>,
    col_indices: Vec<usize>,
    row_pointers: Vec<usize>,
}

impl CsrMatrix {
    /// An empty (all structurally zero) matrix of the given shape.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_pointers: vec![0; nrows + 1],
        }
    }

    /// Identity matrix of size `n`.
    pub fn identity(n: usize) -> Self {
        Self::from_diagonal(&vec![1.0; n])
    }

    pub fn from_diagonal(diag: &[Float]) -> Self {
        let n = diag.len();
        Self {
            nrows: n,
            ncols: n,
            values: diag.to_vec(),
            col_indices: (0..n).collect(),
            row_pointers: (0..=n).collect(),
        }
    }

    /// Build directly from the three arrays. The structure is validated and
    /// each row is normalized to ascending column order.
    pub fn from_arrays(
        nrows: usize,
        ncols: usize,
        values: Vec<Float>,
        col_indices: Vec<usize>,
        row_pointers: Vec<usize>,
    ) -> Result<Self, DaeError> {
        let mut m = Self {
            nrows,
            ncols,
            values,
            col_indices,
            row_pointers,
        };
        m.validate()?;
        Ok(m)
    }

    /// Drop all stored entries, keeping the shape and the allocations.
    pub fn clear(&mut self) {
        self.values.clear();
        self.col_indices.clear();
        self.row_pointers.clear();
        self.row_pointers.push(0);
    }

    /// Reset to a (possibly new) shape with no stored entries.
    pub fn reset(&mut self, nrows: usize, ncols: usize) {
        self.nrows = nrows;
        self.ncols = ncols;
        self.clear();
    }

    /// Pre-allocate room for `nnz` stored entries.
    pub fn reserve(&mut self, nnz: usize) {
        self.values.reserve(nnz);
        self.col_indices.reserve(nnz);
    }

    /// Append the next row. Rows must be appended in order, top to bottom;
    /// entries may be given in any column order. Structure is checked by
    /// [`CsrMatrix::validate`] once the matrix is complete.
    pub fn append_row<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (usize, Float)>,
    {
        let start = self.values.len();
        for (col, val) in entries {
            self.col_indices.push(col);
            self.values.push(val);
        }
        // keep ascending column order within the row
        let row_cols = &self.col_indices[start..];
        if !row_cols.windows(2).all(|w| w[0] < w[1]) {
            let mut perm: Vec<usize> = (0..row_cols.len()).collect();
            perm.sort_by_key(|&k| row_cols[k]);
            let cols: Vec<usize> = perm.iter().map(|&k| row_cols[k]).collect();
            let vals: Vec<Float> = perm.iter().map(|&k| self.values[start + k]).collect();
            self.col_indices[start..].copy_from_slice(&cols);
            self.values[start..].copy_from_slice(&vals);
        }
        self.row_pointers.push(self.values.len());
    }

    /// Check the three-array invariants: pointer monotonicity, column
    /// bounds, ascending column order and no duplicates within a row.
    pub fn validate(&mut self) -> Result<(), DaeError> {
        if self.row_pointers.len() != self.nrows + 1 {
            return Err(matrix_error!(WrongRowPointerLength {
                expected: self.nrows + 1,
                found: self.row_pointers.len(),
            }));
        }
        if self.values.len() != self.col_indices.len() {
            return Err(matrix_error!(MismatchedArrayLengths {
                values: self.values.len(),
                columns: self.col_indices.len(),
            }));
        }
        if *self.row_pointers.last().unwrap() != self.values.len() {
            return Err(matrix_error!(WrongTotalNonZeros {
                expected: self.values.len(),
                found: *self.row_pointers.last().unwrap(),
            }));
        }
        for row in 0..self.nrows {
            let (start, end) = (self.row_pointers[row], self.row_pointers[row + 1]);
            if start > end || end > self.values.len() {
                return Err(matrix_error!(RowPointersNotMonotonic { row }));
            }
            self.sort_row(start, end);
            let cols = &self.col_indices[start..end];
            for (k, &col) in cols.iter().enumerate() {
                if col >= self.ncols {
                    return Err(matrix_error!(ColumnOutOfBounds {
                        row,
                        col,
                        ncols: self.ncols,
                    }));
                }
                if k > 0 && cols[k - 1] == col {
                    return Err(matrix_error!(DuplicateEntry { row, col }));
                }
            }
        }
        Ok(())
    }

    fn sort_row(&mut self, start: usize, end: usize) {
        let cols = &self.col_indices[start..end];
        if cols.windows(2).all(|w| w[0] <= w[1]) {
            return;
        }
        let mut perm: Vec<usize> = (0..end - start).collect();
        perm.sort_by_key(|&k| cols[k]);
        let sorted_cols: Vec<usize> = perm.iter().map(|&k| cols[k]).collect();
        let sorted_vals: Vec<Float> = perm.iter().map(|&k| self.values[start + k]).collect();
        self.col_indices[start..end].copy_from_slice(&sorted_cols);
        self.values[start..end].copy_from_slice(&sorted_vals);
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[Float] {
        &self.values
    }

    /// Mutable access to the stored values, pattern unchanged.
    pub(crate) fn values_mut(&mut self) -> &mut [Float] {
        &mut self.values
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn row_pointers(&self) -> &[usize] {
        &self.row_pointers
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[Float]) {
        let (start, end) = (self.row_pointers[i], self.row_pointers[i + 1]);
        (&self.col_indices[start..end], &self.values[start..end])
    }

    /// `(row, col, value)` iterator in row-major order.
    pub fn triplet_iter(&self) -> impl Iterator<Item = (usize, usize, Float)> + '_ {
        (0..self.nrows).flat_map(move |i| {
            let (cols, vals) = self.row(i);
            cols.iter().zip(vals).map(move |(&j, &v)| (i, j, v))
        })
    }

    /// True when `other` has the identical structural pattern.
    pub fn pattern_matches(&self, other: &CsrMatrix) -> bool {
        self.nrows == other.nrows
            && self.ncols == other.ncols
            && self.row_pointers == other.row_pointers
            && self.col_indices == other.col_indices
    }

    /// Hash of `(ia, ja)`, used to key symbolic-factorization caches.
    pub fn pattern_fingerprint(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.nrows.hash(&mut h);
        self.ncols.hash(&mut h);
        self.row_pointers.hash(&mut h);
        self.col_indices.hash(&mut h);
        h.finish()
    }

    /// `y = A * x`.
    pub fn mul_vec(&self, x: &[Float], y: &mut [Float]) {
        debug_assert_eq!(x.len(), self.ncols);
        debug_assert_eq!(y.len(), self.nrows);
        for i in 0..self.nrows {
            let mut acc = 0.0;
            for k in self.row_pointers[i]..self.row_pointers[i + 1] {
                acc += self.values[k] * x[self.col_indices[k]];
            }
            y[i] = acc;
        }
    }

    /// `self = alpha * a + beta * b` as a row-wise structural merge.
    ///
    /// The result pattern is the union of the two operand patterns; entries
    /// present in both contribute `alpha*a + beta*b`, entries present in one
    /// contribute the weighted value alone. Cancellation to exact zero keeps
    /// the entry stored. Existing allocations are reused, so once the union
    /// pattern has been seen the merge allocates nothing.
    pub fn linear_combination(
        &mut self,
        alpha: Float,
        a: &CsrMatrix,
        beta: Float,
        b: &CsrMatrix,
    ) -> Result<(), DaeError> {
        if a.nrows != b.nrows || a.ncols != b.ncols {
            return Err(DaeError::from(MatrixError::IncompatibleShapes(
                a.nrows, a.ncols, b.nrows, b.ncols,
            )));
        }
        self.nrows = a.nrows;
        self.ncols = a.ncols;
        self.values.clear();
        self.col_indices.clear();
        self.row_pointers.clear();
        self.row_pointers.push(0);
        for i in 0..a.nrows {
            let (acols, avals) = a.row(i);
            let (bcols, bvals) = b.row(i);
            let (mut p, mut q) = (0, 0);
            while p < acols.len() || q < bcols.len() {
                let ca = acols.get(p).copied().unwrap_or(usize::MAX);
                let cb = bcols.get(q).copied().unwrap_or(usize::MAX);
                if ca < cb {
                    self.col_indices.push(ca);
                    self.values.push(alpha * avals[p]);
                    p += 1;
                } else if cb < ca {
                    self.col_indices.push(cb);
                    self.values.push(beta * bvals[q]);
                    q += 1;
                } else {
                    self.col_indices.push(ca);
                    self.values.push(alpha * avals[p] + beta * bvals[q]);
                    p += 1;
                    q += 1;
                }
            }
            self.row_pointers.push(self.values.len());
        }
        Ok(())
    }
}

impl fmt::Display for CsrMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}x{} CSR, {} stored entries", self.nrows, self.ncols, self.nnz())?;
        for (i, j, v) in self.triplet_iter() {
            writeln!(f, "  ({i}, {j}) = {v:e}")?;
        }
        Ok(())
    }
}
