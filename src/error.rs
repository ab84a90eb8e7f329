//! Error taxonomy for the orchestration pipeline.
//!
//! Configuration and planning errors are fatal and surface before any run
//! starts. Execution, collection and rendering errors are scoped to a single
//! run (or to the rendering step) and never abort the run loop.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("configuration file {} is not well-formed: {reason}", .path.display())]
    ConfigMalformed { path: PathBuf, reason: String },

    #[error("configuration is invalid:\n  - {}", .0.join("\n  - "))]
    ConfigInvalid(Vec<String>),

    #[error(
        "runs '{first}' and '{second}' both map to artifact name '{base_name}'; rename one of the requests"
    )]
    PlanAmbiguous {
        base_name: String,
        first: String,
        second: String,
    },

    #[error("load generator unavailable for run '{run}': {reason}")]
    ExecutionUnavailable { run: String, reason: String },

    #[error("nothing to run: every request in {} was skipped", .0.display())]
    NothingToRun(PathBuf),

    #[error("rendering failed: {0}")]
    RenderingFailed(String),

    #[error("cannot serve dashboard on {addr}: {reason}")]
    ServeUnavailable { addr: String, reason: String },

    #[error("no data to report: no run produced collectable artifacts")]
    NoData,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_invalid_lists_every_problem() {
        let err = Error::ConfigInvalid(vec![
            "missing field `baseUrl`".to_string(),
            "peakUsers must be >= 1".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("missing field `baseUrl`"));
        assert!(msg.contains("peakUsers must be >= 1"));
    }

    #[test]
    fn test_nothing_to_run_names_the_file() {
        let err = Error::NothingToRun(PathBuf::from("config.json"));
        assert_eq!(
            err.to_string(),
            "nothing to run: every request in config.json was skipped"
        );
    }
}
