// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use cedarcam::pipeline::SessionError;
use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Request outside what the tool supports; answered with usage, not failure
    Rejected(String),
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Capture device, media graph or sensor missing or inaccessible
    CameraNotFound(String),
    /// CedarC libraries or encoder hardware not available
    EncoderUnavailable(String),
    /// Capture loop aborted after streaming started
    CaptureFailed(String),
    /// General error from the cedarcam library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Rejected(msg) => write!(f, "Error: {}", msg),
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::CameraNotFound(msg) => write!(f, "Camera not found: {}", msg),
            CliError::EncoderUnavailable(msg) => write!(f, "Encoder unavailable: {}", msg),
            CliError::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Rejected(_) => ExitCode::SUCCESS,
            CliError::InvalidArgs(_) => ExitCode::from(2),
            CliError::CameraNotFound(_) => ExitCode::from(3),
            CliError::EncoderUnavailable(_) => ExitCode::from(4),
            CliError::CaptureFailed(_) => ExitCode::from(5),
            CliError::General(_) => ExitCode::from(1),
        }
    }
}

/// Map cedarcam::Error raised during setup to CliError
impl From<cedarcam::Error> for CliError {
    fn from(err: cedarcam::Error) -> Self {
        use cedarcam::Error;

        match err {
            Error::LibraryNotLoaded(lib_err) => {
                CliError::EncoderUnavailable(format!("Failed to load library: {}", lib_err))
            }
            Error::Encoder { .. } | Error::NullPointer => CliError::EncoderUnavailable(err.to_string()),

            Error::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    CliError::CameraNotFound(io_err.to_string())
                }
                _ => CliError::General(format!("I/O error: {}", io_err)),
            },

            Error::EntityNotFound(_)
            | Error::PadNotFound(_)
            | Error::MissingCapability(_)
            | Error::NoBuffers => CliError::CameraNotFound(err.to_string()),

            Error::Unsupported { .. } => CliError::Rejected(err.to_string()),

            _ => CliError::General(err.to_string()),
        }
    }
}

impl From<SessionError> for CliError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Setup(err) => err.into(),
            SessionError::Streaming { frame, source } => {
                CliError::CaptureFailed(format!("frame {}: {}", frame, source))
            }
            SessionError::ConfigurationRejected(msg) => CliError::Rejected(msg),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(CliError::Rejected(msg)) => {
            log::error!("Error: {}", msg);
            crate::usage();
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}
