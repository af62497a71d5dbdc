//! N-channel sample values and their covariance.
//!
//! Per-pixel covariance is stored compressed as the upper triangle of the
//! symmetric N×N matrix, row by row: `(0,0), (0,1) .. (0,N-1), (1,1) ..`.

use nalgebra::{Cholesky, DMatrix, SMatrix, SVector};

/// Scalar type for all sample statistics.
pub type Float = f64;

/// An N-channel sample value (RGB when N = 3, spectral otherwise).
pub type Spectrum<const N: usize> = SVector<Float, N>;

/// An N×N matrix over sample channels.
pub type Matrix<const N: usize> = SMatrix<Float, N, N>;

/// Relative ridge added to the diagonal before factorisation.
const RIDGE_SCALE: Float = 1e-6;

/// Lower bound of the mean diagonal used to scale the ridge.
const MIN_RIDGE_BASE: Float = 1e-12;

/// Number of compressed factors of a symmetric `dimension`×`dimension` matrix.
pub const fn covariance_factor_count(dimension: usize) -> usize {
    dimension * (dimension + 1) / 2
}

/// Rebuild the full symmetric matrix from its compressed upper triangle.
pub fn factors_to_matrix<const N: usize>(factors: &[Float]) -> Matrix<N> {
    debug_assert_eq!(factors.len(), covariance_factor_count(N));
    let mut matrix = Matrix::<N>::zeros();
    let mut offset = 0;
    for a in 0..N {
        for b in a..N {
            matrix[(a, b)] = factors[offset];
            matrix[(b, a)] = factors[offset];
            offset += 1;
        }
    }
    matrix
}

/// `floor + max(matrix - floor, 0)`, with the maximum taken over the
/// eigenvalues of the symmetric difference.
///
/// The result is never below `floor` in the positive semi-definite order,
/// so a sample covariance clamped by the noise covariance it contains stays
/// at least as large as that noise.
pub fn clamp_covariance<const N: usize>(matrix: &Matrix<N>, floor: &Matrix<N>) -> Matrix<N> {
    let difference = DMatrix::from_column_slice(N, N, (matrix - floor).as_slice());
    let mut eigen = difference.symmetric_eigen();
    eigen.eigenvalues.apply(|v| *v = v.max(0.0));
    floor + Matrix::<N>::from_column_slice(eigen.recompose().as_slice())
}

/// Solve `matrix · x = rhs` for a symmetric positive semi-definite `matrix`.
///
/// A small ridge proportional to the mean diagonal keeps rank-deficient
/// sample covariances factorisable. Returns `None` when the matrix is
/// still not positive definite.
pub struct SymmetricSolver<const N: usize> {
    cholesky: Cholesky<Float, nalgebra::Const<N>>,
}

impl<const N: usize> SymmetricSolver<N> {
    pub fn new(matrix: &Matrix<N>) -> Option<Self> {
        let trace: Float = (0..N).map(|i| matrix[(i, i)]).sum();
        let ridge = RIDGE_SCALE * (trace / N as Float).max(MIN_RIDGE_BASE);
        let mut regularized = *matrix;
        for i in 0..N {
            regularized[(i, i)] += ridge;
        }
        Cholesky::new(regularized).map(|cholesky| Self { cholesky })
    }

    #[inline]
    pub fn solve(&self, rhs: &Spectrum<N>) -> Spectrum<N> {
        self.cholesky.solve(rhs)
    }
}
