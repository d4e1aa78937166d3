//! Error types for the cranksim binary.
//!
//! [`AppError`] wraps every failure mode during start-up and the run, so
//! `main` can propagate with `?`.

/// Top-level error for the cranksim binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Settings loading or sensor resolution failed.
    #[error("settings error: {source}")]
    Settings {
        /// The underlying settings error.
        #[from]
        source: cranksim_core::config::SettingsError,
    },

    /// The engine rejected a start-up command.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: cranksim_core::engine::EngineError,
    },

    /// The tick loop could not run.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: cranksim_core::runner::RunnerError,
    },

    /// The edge consumer task failed.
    #[error("edge consumer error: {message}")]
    Consumer {
        /// Description of the consumer failure.
        message: String,
    },
}
