// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Window build error types

use std::error;
use std::fmt::{Display, Formatter};
use std::io;
use std::result;

use arrow::error::ArrowError;

/// Result type for operations that could result in a [`WindowBuildError`]
pub type Result<T, E = WindowBuildError> = result::Result<T, E>;

/// Error type for generic operations that could result in [`WindowBuildError::External`]
pub type GenericError = Box<dyn error::Error + Send + Sync>;

/// Window build error
#[derive(Debug)]
pub enum WindowBuildError {
    /// Error returned by arrow, e.g. while encoding rows or reading a
    /// spill file back.
    ArrowError(ArrowError),
    /// Error associated to I/O operations, most commonly while writing or
    /// reading spill files.
    IoError(io::Error),
    /// Error returned on a branch that we know it is possible
    /// but to which we still have no implementation for.
    NotImplemented(String),
    /// Error returned as a consequence of a broken internal invariant, e.g.
    /// asking for a window partition when none is available. This error
    /// should not happen in correct usage.
    Internal(String),
    /// Error returned when a configuration value is invalid.
    Configuration(String),
    /// Error returned during execution, e.g. an input batch that does not
    /// match the configured input schema.
    Execution(String),
    /// This error is thrown when a consumer cannot acquire memory from the
    /// memory pool. The enclosing query is expected to abort.
    ResourcesExhausted(String),
    /// Errors originating from outside this crate
    External(GenericError),
}

impl From<io::Error> for WindowBuildError {
    fn from(e: io::Error) -> Self {
        WindowBuildError::IoError(e)
    }
}

impl From<ArrowError> for WindowBuildError {
    fn from(e: ArrowError) -> Self {
        match e {
            ArrowError::IoError(_, e) => WindowBuildError::IoError(e),
            e => WindowBuildError::ArrowError(e),
        }
    }
}

impl From<WindowBuildError> for ArrowError {
    fn from(e: WindowBuildError) -> Self {
        match e {
            WindowBuildError::ArrowError(e) => e,
            WindowBuildError::External(e) => ArrowError::ExternalError(e),
            other => ArrowError::ExternalError(Box::new(other)),
        }
    }
}

impl From<GenericError> for WindowBuildError {
    fn from(err: GenericError) -> Self {
        WindowBuildError::External(err)
    }
}

impl Display for WindowBuildError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            WindowBuildError::ArrowError(desc) => write!(f, "Arrow error: {desc}"),
            WindowBuildError::IoError(desc) => write!(f, "IO error: {desc}"),
            WindowBuildError::NotImplemented(desc) => {
                write!(f, "This feature is not implemented: {desc}")
            }
            WindowBuildError::Internal(desc) => {
                write!(f, "Internal error: {desc}. This was likely caused by a bug in the \
                    window build and we would welcome that you file a bug report in our issue tracker")
            }
            WindowBuildError::Configuration(desc) => {
                write!(f, "Invalid or Unsupported Configuration: {desc}")
            }
            WindowBuildError::Execution(desc) => write!(f, "Execution error: {desc}"),
            WindowBuildError::ResourcesExhausted(desc) => {
                write!(f, "Resources exhausted: {desc}")
            }
            WindowBuildError::External(desc) => write!(f, "External error: {desc}"),
        }
    }
}

impl error::Error for WindowBuildError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            WindowBuildError::ArrowError(e) => Some(e),
            WindowBuildError::IoError(e) => Some(e),
            WindowBuildError::External(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl WindowBuildError {
    /// Returns true if this error was raised by a broken internal invariant
    pub fn is_internal(&self) -> bool {
        matches!(self, WindowBuildError::Internal(_))
    }

    /// Returns the error message without the variant prefix
    pub fn message(&self) -> String {
        match self {
            WindowBuildError::NotImplemented(desc)
            | WindowBuildError::Internal(desc)
            | WindowBuildError::Configuration(desc)
            | WindowBuildError::Execution(desc)
            | WindowBuildError::ResourcesExhausted(desc) => desc.clone(),
            other => other.to_string(),
        }
    }
}

/// Returns an `Err(WindowBuildError::Internal)` built from a format string
#[macro_export]
macro_rules! internal_err {
    ($($arg:tt)*) => {
        Err($crate::error::WindowBuildError::Internal(format!($($arg)*)))
    };
}

/// Builds a `WindowBuildError::Internal` from a format string
#[macro_export]
macro_rules! internal_window_err {
    ($($arg:tt)*) => {
        $crate::error::WindowBuildError::Internal(format!($($arg)*))
    };
}

/// Returns an `Err(WindowBuildError::Execution)` built from a format string
#[macro_export]
macro_rules! exec_err {
    ($($arg:tt)*) => {
        Err($crate::error::WindowBuildError::Execution(format!($($arg)*)))
    };
}

/// Builds a `WindowBuildError::Execution` from a format string
#[macro_export]
macro_rules! exec_window_err {
    ($($arg:tt)*) => {
        $crate::error::WindowBuildError::Execution(format!($($arg)*))
    };
}

/// Returns an `Err(WindowBuildError::Configuration)` built from a format string
#[macro_export]
macro_rules! config_err {
    ($($arg:tt)*) => {
        Err($crate::error::WindowBuildError::Configuration(format!($($arg)*)))
    };
}

/// Returns an `Err(WindowBuildError::ResourcesExhausted)` built from a format string
#[macro_export]
macro_rules! resources_err {
    ($($arg:tt)*) => {
        Err($crate::error::WindowBuildError::ResourcesExhausted(format!($($arg)*)))
    };
}

/// Builds a `WindowBuildError::ResourcesExhausted` from a format string
#[macro_export]
macro_rules! resources_window_err {
    ($($arg:tt)*) => {
        $crate::error::WindowBuildError::ResourcesExhausted(format!($($arg)*))
    };
}

/// Returns an internal error from the enclosing function when the two
/// expressions are not equal
#[macro_export]
macro_rules! assert_eq_or_internal_err {
    ($left:expr, $right:expr, $($arg:tt)+) => {{
        let left_val = &$left;
        let right_val = &$right;
        if left_val != right_val {
            return Err($crate::error::WindowBuildError::Internal(format!(
                "Assertion failed: {} == {} (left: {:?}, right: {:?}): {}",
                stringify!($left),
                stringify!($right),
                left_val,
                right_val,
                format!($($arg)+)
            )));
        }
    }};
}

#[cfg(test)]
mod test {
    use crate::error::{Result, WindowBuildError};
    use arrow::error::ArrowError;

    #[test]
    fn arrow_error_to_window_build() {
        let res = return_arrow_error().unwrap_err();
        assert_eq!(
            res.to_string(),
            "External error: Execution error: foo"
        );
    }

    #[test]
    fn window_build_error_to_arrow() {
        let res = return_window_build_error().unwrap_err();
        assert_eq!(res.to_string(), "Arrow error: Schema error: bar");
    }

    #[test]
    fn arrow_io_error_is_unwrapped() {
        let err: WindowBuildError = ArrowError::IoError(
            "spill".to_string(),
            std::io::Error::other("disk full"),
        )
        .into();
        assert!(matches!(err, WindowBuildError::IoError(_)));
        assert_eq!(err.to_string(), "IO error: disk full");
    }

    #[test]
    fn internal_macros() {
        let res: Result<()> = internal_err!("No window partitions {}", "available");
        let err = res.unwrap_err();
        assert!(err.is_internal());
        assert_eq!(err.message(), "No window partitions available");

        let res = assert_equal(1, 2).unwrap_err();
        assert!(res.is_internal());
        assert!(res.message().contains("Expected exactly one spill partition"));
        assert!(assert_equal(1, 1).is_ok());
    }

    fn assert_equal(left: usize, right: usize) -> Result<()> {
        assert_eq_or_internal_err!(left, right, "Expected exactly one spill partition");
        Ok(())
    }

    #[allow(clippy::try_err)]
    fn return_arrow_error() -> arrow::error::Result<()> {
        // Expect the '?' to work
        Err::<(), _>(WindowBuildError::Execution("foo".to_string()))?;
        Ok(())
    }

    #[allow(clippy::try_err)]
    fn return_window_build_error() -> Result<()> {
        // Expect the '?' to work
        Err::<(), _>(ArrowError::SchemaError("bar".to_string()))?;
        Ok(())
    }
}
