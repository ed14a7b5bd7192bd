//! The pipelines, one per kind of job.

pub mod common;
pub mod zarr;

pub mod brt;
pub mod czi;
pub mod dm;
pub mod lrg2d;
pub mod sem;
