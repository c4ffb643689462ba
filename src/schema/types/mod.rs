pub mod file;
pub mod geometry;
pub mod reference;
