//! Build-time precision selection.
//!
//! The whole crate is written against the [`Float`] alias. The `f64` feature
//! (default) selects double precision; enabling `f32` (with default features
//! disabled) selects single precision. Tolerance defaults elsewhere in the
//! crate scale with the chosen precision.

// Prevent selecting two incompatible float precision features at once.
#[cfg(all(feature = "f32", feature = "f64"))]
compile_error!(
    "features 'f32' and 'f64' cannot both be enabled; pick exactly one precision feature"
);

#[cfg(feature = "f32")]
pub type Float = f32;
#[cfg(not(feature = "f32"))]
pub type Float = f64;

pub type IndexType = usize;

/// Maximum supported BDF order.
pub const MAX_ORDER: usize = 6;
