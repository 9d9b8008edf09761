pub mod sparse_matrix;

pub use faer::sparse::Triplet;
pub use sparse_matrix::{Scalar, SparseMat};
