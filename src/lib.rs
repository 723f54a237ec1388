pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod pipeline;
pub mod process;

pub use config::Config;
pub use error::PipelineError;
pub use pipeline::{run, RunSummary};
