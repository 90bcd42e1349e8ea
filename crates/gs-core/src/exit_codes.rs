//! Process exit codes.
//!
//! A run that reaches its summary exits 0 even when events failed; those
//! failures live in the summary. Non-zero codes mean the run never started
//! or the process itself broke:
//!
//! | code | name              | cause                                   |
//! |------|-------------------|-----------------------------------------|
//! | 10   | `ERR_ARGS`        | bad arguments or configuration          |
//! | 15   | `ERR_SESSION`     | session artifact missing or expired     |
//! | 16   | `ERR_CREDENTIALS` | store URL or key missing                |
//! | 17   | `ERR_DRIVER`      | automation driver unreachable           |
//! | 20   | `ERR_INTERNAL`    | a bug                                   |
//! | 21   | `ERR_IO`          | local filesystem failure                |

use gs_common::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Clean = 0,
    ArgsError = 10,
    SessionError = 15,
    CredentialsError = 16,
    DriverError = 17,
    InternalError = 20,
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Precondition failures the operator can fix (10-19).
    pub fn is_precondition(self) -> bool {
        (10..20).contains(&self.as_i32())
    }

    pub fn is_internal_error(self) -> bool {
        self.as_i32() >= 20
    }

    /// Stable name used in JSON error payloads.
    pub fn code_name(self) -> &'static str {
        match self {
            ExitCode::Clean => "OK",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::SessionError => "ERR_SESSION",
            ExitCode::CredentialsError => "ERR_CREDENTIALS",
            ExitCode::DriverError => "ERR_DRIVER",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }

    /// Code for an error that aborted the command.
    pub fn for_error(err: &Error) -> Self {
        match err {
            Error::Config(_) => ExitCode::ArgsError,
            Error::SessionInvalid(_) | Error::SessionExpired { .. } => ExitCode::SessionError,
            Error::CredentialsMissing(_) => ExitCode::CredentialsError,
            Error::DriverUnavailable(_) => ExitCode::DriverError,
            Error::Io(_) => ExitCode::IoError,
            // Per-event failures only get here when something is miswired.
            _ => ExitCode::InternalError,
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
