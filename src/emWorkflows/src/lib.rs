
pub mod logging;
pub mod error;
pub mod config;
pub mod share;
pub mod discovery;
pub mod runner;
pub mod assets;
pub mod work_unit;
pub mod template;
pub mod dag;
pub mod executor;
pub mod callback;
pub mod workflows;

mod tiff;
