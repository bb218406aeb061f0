//! Configuration
//!
//! Builder and evaluator settings. Both structs deserialize from JSON with
//! every field optional, so a config file only needs to name what it changes.
//! The worker count can also be overridden with the `DEPSGRAPH_THREADS`
//! environment variable.

use serde::{Deserialize, Serialize};

use crate::error::DepsgraphError;

/// Environment variable overriding [`EvaluatorConfig::worker_threads`].
pub const THREADS_ENV: &str = "DEPSGRAPH_THREADS";

/// Settings for [`Evaluator`](crate::eval::Evaluator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Number of worker threads. `1` evaluates on the calling thread.
    pub worker_threads: usize,

    /// Run the graph-level cycle pass before flattening when relations changed.
    pub detect_cycles: bool,

    /// Emit a `trace` event per executed operation.
    pub log_operations: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            detect_cycles: true,
            log_operations: false,
        }
    }
}

impl EvaluatorConfig {
    /// Single-threaded evaluation.
    pub fn serial() -> Self {
        Self {
            worker_threads: 1,
            ..Self::default()
        }
    }

    /// Evaluation on `threads` workers.
    pub fn with_threads(threads: usize) -> Self {
        Self {
            worker_threads: threads.max(1),
            ..Self::default()
        }
    }

    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, DepsgraphError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DEPSGRAPH_THREADS` if it is set to a positive integer.
    pub fn with_env_overrides(mut self) -> Result<Self, DepsgraphError> {
        if let Ok(value) = std::env::var(THREADS_ENV) {
            let threads: usize = value.trim().parse().map_err(|_| {
                DepsgraphError::Config(format!("{THREADS_ENV}={value:?} is not a number"))
            })?;
            self.worker_threads = threads;
        }
        self.validate()?;
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<(), DepsgraphError> {
        if self.worker_threads == 0 {
            return Err(DepsgraphError::Config(
                "worker_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// How the relation builder answers "do these bones share an IK root".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootLookup {
    /// Build a bone-to-roots table once per armature.
    #[default]
    Precomputed,
    /// Walk the IK chains on every query.
    Naive,
}

/// Settings for graph (re)builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// After a rebuild, propagate dirtiness from every operation that is
    /// dirty (new or carried over) so dependents re-run too.
    pub flush_after_rebuild: bool,

    /// Bone root lookup strategy.
    pub root_lookup: RootLookup,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            flush_after_rebuild: true,
            root_lookup: RootLookup::Precomputed,
        }
    }
}

impl BuildConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, DepsgraphError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EvaluatorConfig::from_json(r#"{ "worker_threads": 3 }"#).unwrap();
        assert_eq!(config.worker_threads, 3);
        assert!(config.detect_cycles);
        assert!(!config.log_operations);
    }

    #[test]
    fn zero_threads_rejected() {
        let err = EvaluatorConfig::from_json(r#"{ "worker_threads": 0 }"#).unwrap_err();
        assert!(matches!(err, DepsgraphError::Config(_)));
    }

    /// Test that the thread override parses, rejects zero and rejects
    /// non-numbers. The only test touching the variable, so values run in
    /// sequence.
    #[test]
    fn threads_env_override() {
        std::env::set_var(THREADS_ENV, " 6 ");
        let config = EvaluatorConfig::serial().with_env_overrides().unwrap();
        assert_eq!(config.worker_threads, 6);

        std::env::set_var(THREADS_ENV, "0");
        let err = EvaluatorConfig::serial().with_env_overrides().unwrap_err();
        assert!(matches!(err, DepsgraphError::Config(_)));

        std::env::set_var(THREADS_ENV, "abc");
        let err = EvaluatorConfig::serial().with_env_overrides().unwrap_err();
        assert!(err.to_string().contains("is not a number"), "{err}");

        // Unset leaves the config alone
        std::env::remove_var(THREADS_ENV);
        let config = EvaluatorConfig::with_threads(3).with_env_overrides().unwrap();
        assert_eq!(config.worker_threads, 3);
    }

    #[test]
    fn build_config_round_trips_defaults() {
        let config = BuildConfig::from_json("{}").unwrap();
        assert_eq!(config, BuildConfig::default());

        let naive = BuildConfig::from_json(r#"{ "root_lookup": "naive" }"#).unwrap();
        assert_eq!(naive.root_lookup, RootLookup::Naive);
        assert!(naive.flush_after_rebuild);
    }
}
