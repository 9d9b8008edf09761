pub use crate::error::Error;
pub type Result<T> = core::result::Result<T, Error>;

pub use crate::circuit::{Circuit, NetRef, Terminal};
pub use crate::element::{Element, ElementBuilder, Pin};
pub use crate::expr::Expr;
pub use crate::topology::topomat;
pub use strom_matrix::{SparseMat, Triplet};
