pub mod analysis;
pub mod arrangement;
pub mod classify;
pub mod field;
pub mod geometry;
pub mod isocenter;
pub mod marker;
pub mod regions;
pub mod scale;
pub mod shift;
