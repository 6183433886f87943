//! Math Kernel and Matrix Storage
//!
//! Column-major 4×4 matrix routines with in-place `*_to` variants, plus the
//! contiguous matrix pools the transform system allocates slots from. All hot
//! paths write directly into `[f32; 16]` rows, so a full hierarchy update
//! performs no heap allocation.

pub mod kernel;
pub mod storage;

pub use kernel::{
    compose_trs_to, identity_to, invert_to, mul_to, normal_matrix_to, transform_point, MAT4_SIZE,
    NORMAL_MATRIX_SIZE,
};
pub use storage::{MatrixIndex, MatrixStorage, MAX_MATRICES};
