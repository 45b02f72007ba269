#![warn(missing_docs)]

//! Generic utilities shared by the voxel engine crates.

/// Hashers specialized for integer keys such as chunk coordinates.
pub mod hash;
/// Configures log4rs for the server and client processes.
pub mod logging;
mod uln;
mod vector;

pub use uln::UnlocalizedName;
pub use vector::Vector;
