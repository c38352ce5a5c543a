//! Exit codes for the sbc CLI.
//!
//! Exit code ranges:
//! - 0-3: Operational outcomes (parse outcome from code, not output)
//! - 10-19: User/specification errors (recoverable by user action)
//! - 20-29: Internal errors

use sbc_common::{Error, ErrorCategory};

/// Exit codes for sbc operations.
///
/// These codes are a stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-3)
    // ========================================================================
    /// Success: every replicate completed and no parameter looks miscalibrated
    Clean = 0,

    /// At least one parameter fails the uniformity test, or too many
    /// replicates were flagged for non-convergence
    CalibrationSuspect = 1,

    /// Some replicates failed and were excluded from aggregation
    PartialFail = 3,

    // ========================================================================
    // User / Specification Errors (10-19)
    // ========================================================================
    /// Invalid arguments or run configuration
    ArgsError = 10,

    /// Invalid prior specification or design/model mismatch
    SpecError = 11,

    /// Run directory was created with different inputs
    ConfigMismatch = 13,

    /// Run not found
    RunNotFound = 15,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error
    IoError = 21,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Codes below 10 describe an outcome, not a failure to run.
    pub fn is_operational(self) -> bool {
        (self as i32) < 10
    }

    /// Map a fatal error to its exit code.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::ConfigMismatch { .. } => ExitCode::ConfigMismatch,
            Error::RunNotFound { .. } => ExitCode::RunNotFound,
            Error::Config(_) => ExitCode::ArgsError,
            Error::InvalidPriorSpec(_) | Error::SchemaMismatch(_) => ExitCode::SpecError,
            _ => match err.category() {
                ErrorCategory::Io | ErrorCategory::Store => ExitCode::IoError,
                ErrorCategory::Spec => ExitCode::SpecError,
                ErrorCategory::Fit => ExitCode::InternalError,
            },
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExitCode::Clean => "clean",
            ExitCode::CalibrationSuspect => "calibration_suspect",
            ExitCode::PartialFail => "partial_fail",
            ExitCode::ArgsError => "args_error",
            ExitCode::SpecError => "spec_error",
            ExitCode::ConfigMismatch => "config_mismatch",
            ExitCode::RunNotFound => "run_not_found",
            ExitCode::InternalError => "internal_error",
            ExitCode::IoError => "io_error",
        };
        write!(f, "{}", name)
    }
}
