pub mod attachments;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod filesystem;
pub mod model;
pub mod pages;
pub mod render;
pub mod report;
pub mod runner;
pub mod runtime;
pub mod store;
pub mod translate;

pub use error::{ErrorKind, MigrationError, Result};
pub use report::MigrationReport;
pub use runner::MigrationRunner;
