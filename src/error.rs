use thiserror::Error;

/// Top-level error type for the crate.
///
/// Wraps the errors of the individual subsystems. Only unrecoverable
/// conditions reach the caller; step-local failures (a singular iteration
/// matrix, a diverging Newton iteration) are handled internally by the step
/// controller and never surface here.
#[derive(Error, Debug)]
pub enum DaeError {
    #[error("Matrix error: {0}")]
    MatrixError(#[from] MatrixError),
    #[error("Linear solver error: {0}")]
    LinearSolverError(#[from] LinearSolverError),
    #[error("Solver error: {0}")]
    SolverError(#[from] SolverError),
}

impl DaeError {
    /// Stable nonzero process exit code for the error category, for CLI
    /// front-ends that map a failed solve to a shell status.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaeError::SolverError(SolverError::InvalidConfig(_)) => 2,
            DaeError::MatrixError(_) => 3,
            DaeError::LinearSolverError(_) => 4,
            DaeError::SolverError(SolverError::StepSizeTooSmall { .. }) => 10,
            DaeError::SolverError(SolverError::TooManyRejections { .. }) => 11,
            DaeError::SolverError(SolverError::NonFiniteState { .. }) => 12,
            DaeError::SolverError(SolverError::JacobianPatternChanged) => 13,
            DaeError::SolverError(_) => 14,
        }
    }
}

/// Structural errors in a CSR matrix, usually from a user callback.
#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("row pointer array has length {found}, expected {expected}")]
    WrongRowPointerLength { expected: usize, found: usize },
    #[error("value and column index arrays differ in length: {values} vs {columns}")]
    MismatchedArrayLengths { values: usize, columns: usize },
    #[error("row pointers are not non-decreasing at row {row}")]
    RowPointersNotMonotonic { row: usize },
    #[error("last row pointer is {found} but there are {expected} stored entries")]
    WrongTotalNonZeros { expected: usize, found: usize },
    #[error("column index {col} out of bounds in row {row} ({ncols} columns)")]
    ColumnOutOfBounds { row: usize, col: usize, ncols: usize },
    #[error("duplicate entry at ({row}, {col})")]
    DuplicateEntry { row: usize, col: usize },
    #[error("matrix is {nrows}x{ncols}, expected {expected}x{expected}")]
    WrongShape {
        expected: usize,
        nrows: usize,
        ncols: usize,
    },
    #[error("matrices with shapes {0}x{1} and {2}x{3} cannot be combined")]
    IncompatibleShapes(usize, usize, usize, usize),
}

/// Errors from the sparse direct solver facade.
#[derive(Error, Debug)]
pub enum LinearSolverError {
    #[error("factorization detected a singular matrix")]
    SingularMatrix,
    #[error("solve called before a successful factorization")]
    NotFactorized,
    #[error("right-hand side has length {found}, expected {expected}")]
    WrongRhsLength { expected: usize, found: usize },
    #[error("linear solver backend failure: {0}")]
    Backend(String),
}

/// Unrecoverable integration failures.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("step size {dt:e} fell below the minimum {dt_min:e} at t = {t}")]
    StepSizeTooSmall { t: f64, dt: f64, dt_min: f64 },
    #[error("step at t = {t} was rejected {count} times; giving up")]
    TooManyRejections { t: f64, count: usize },
    #[error("state vector became non-finite at t = {t}")]
    NonFiniteState { t: f64 },
    #[error("Jacobian sparsity pattern changed after the first evaluation")]
    JacobianPatternChanged,
}

#[macro_export]
macro_rules! matrix_error {
    ($variant:ident) => {
        $crate::error::DaeError::from($crate::error::MatrixError::$variant)
    };
    ($variant:ident { $($arg:tt)* }) => {
        $crate::error::DaeError::from($crate::error::MatrixError::$variant { $($arg)* })
    };
}

#[macro_export]
macro_rules! linear_solver_error {
    ($variant:ident) => {
        $crate::error::DaeError::from($crate::error::LinearSolverError::$variant)
    };
    ($variant:ident { $($arg:tt)* }) => {
        $crate::error::DaeError::from($crate::error::LinearSolverError::$variant { $($arg)* })
    };
    ($variant:ident, $($arg:tt)*) => {
        $crate::error::DaeError::from($crate::error::LinearSolverError::$variant($($arg)*))
    };
}

#[macro_export]
macro_rules! solver_error {
    ($variant:ident) => {
        $crate::error::DaeError::from($crate::error::SolverError::$variant)
    };
    ($variant:ident { $($arg:tt)* }) => {
        $crate::error::DaeError::from($crate::error::SolverError::$variant { $($arg)* })
    };
    ($variant:ident, $($arg:tt)*) => {
        $crate::error::DaeError::from($crate::error::SolverError::$variant($($arg)*))
    };
}
