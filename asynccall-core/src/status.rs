//! The terminal status of a call.

use serde::{Serialize, Serializer};

use crate::Code;

/// Code and details string that end a call.
///
/// Delivered by the transport exactly once per call, or produced locally when
/// the call is cancelled, times out, or fails before reaching the transport.
///
/// # Example
///
/// ```
/// use asynccall_core::{Code, Status};
///
/// let status = Status::deadline_exceeded("Deadline Exceeded");
/// assert_eq!(status.code(), Code::DeadlineExceeded);
/// assert_eq!(status.details(), "Deadline Exceeded");
/// assert!(!status.is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    code: Code,
    details: String,
}

impl Status {
    /// Create a new status with a code and details string.
    pub fn new<S: Into<String>>(code: Code, details: S) -> Self {
        Self {
            code,
            details: details.into(),
        }
    }

    /// Create a status with an empty details string.
    pub fn from_code(code: Code) -> Self {
        Self::new(code, String::new())
    }

    /// The OK status, with empty details.
    pub fn ok() -> Self {
        Self::from_code(Code::Ok)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    // Convenience constructors for the codes produced locally

    pub fn cancelled<S: Into<String>>(details: S) -> Self {
        Self::new(Code::Cancelled, details)
    }

    pub fn unknown<S: Into<String>>(details: S) -> Self {
        Self::new(Code::Unknown, details)
    }

    pub fn deadline_exceeded<S: Into<String>>(details: S) -> Self {
        Self::new(Code::DeadlineExceeded, details)
    }

    pub fn unimplemented<S: Into<String>>(details: S) -> Self {
        Self::new(Code::Unimplemented, details)
    }

    pub fn internal<S: Into<String>>(details: S) -> Self {
        Self::new(Code::Internal, details)
    }

    pub fn unavailable<S: Into<String>>(details: S) -> Self {
        Self::new(Code::Unavailable, details)
    }

    pub fn unauthenticated<S: Into<String>>(details: S) -> Self {
        Self::new(Code::Unauthenticated, details)
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)?;
        if !self.details.is_empty() {
            write!(f, ": {}", self.details)?;
        }
        Ok(())
    }
}

impl Serialize for Status {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut s = serializer.serialize_struct("Status", 2)?;
        s.serialize_field("code", &self.code)?;
        s.serialize_field("details", &self.details)?;
        s.end()
    }
}
