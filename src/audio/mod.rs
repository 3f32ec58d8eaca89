//! Audio buffer primitives

pub mod buffer;

pub use buffer::{planes, BlockRing, Planes, Transfer};
