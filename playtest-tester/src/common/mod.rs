pub mod config;
pub mod reports;
pub mod util;

pub use config::PlaytestConfig;
pub use util::{capture_artifacts, failure_dir};
