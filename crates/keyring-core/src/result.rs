//! Command result codes and their display messages.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generic message used for technical errors and any unmapped code.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Result code reported by the lock communicator for a completed command.
///
/// Closed enumeration; [`CommandResultCode::TechnicalError`] is also
/// synthesized locally for exceptions and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandResultCode {
    /// Command executed.
    Ok,
    /// Lock is in a mode that does not accept this command.
    WrongLockMode,
    /// Lock firmware is too old for this app.
    LockVersionTooOld,
    /// Lock firmware is too new for this app.
    LockVersionTooYoung,
    /// Lock hardware is not fully assembled.
    LockNotFullyAssembled,
    /// Server could not be reached while executing the command.
    ServerCommunicationError,
    /// Lock clock is invalid.
    #[serde(rename = "lock-datetime-invalid", alias = "lock-date-time-invalid")]
    LockDateTimeInvalid,
    /// Access is temporarily denied.
    TemporarilyUnauthorized,
    /// Key is not valid yet.
    UnauthorizedNotYetValid,
    /// Key does not grant access.
    Unauthorized,
    /// BLE communication with the lock failed.
    LockCommunicationError,
    /// Error specific to the user's account.
    UserSpecificError,
    /// Any other failure, including exceptions and timeouts.
    TechnicalError,
}

impl CommandResultCode {
    /// All codes, in declaration order.
    pub const ALL: [Self; 13] = [
        Self::Ok,
        Self::WrongLockMode,
        Self::LockVersionTooOld,
        Self::LockVersionTooYoung,
        Self::LockNotFullyAssembled,
        Self::ServerCommunicationError,
        Self::LockDateTimeInvalid,
        Self::TemporarilyUnauthorized,
        Self::UnauthorizedNotYetValid,
        Self::Unauthorized,
        Self::LockCommunicationError,
        Self::UserSpecificError,
        Self::TechnicalError,
    ];

    /// True only for [`CommandResultCode::Ok`].
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Human-readable message for this code.
    ///
    /// Total: user-specific and technical errors share the generic fallback.
    pub fn message(self) -> &'static str {
        match self {
            Self::Ok => "Success",
            Self::WrongLockMode => "The lock is in a mode that does not allow opening.",
            Self::LockVersionTooOld => "The lock firmware is too old. Please update the lock.",
            Self::LockVersionTooYoung => "The lock firmware is too new. Please update the app.",
            Self::LockNotFullyAssembled => "The lock is not fully assembled.",
            Self::ServerCommunicationError => "The server could not be reached.",
            Self::LockDateTimeInvalid => "The lock's date and time are invalid.",
            Self::TemporarilyUnauthorized | Self::UnauthorizedNotYetValid => {
                "Your key is not valid at this time."
            },
            Self::Unauthorized => "You are not authorized to open this lock.",
            Self::LockCommunicationError => "Communication with the lock failed.",
            Self::UserSpecificError | Self::TechnicalError => GENERIC_ERROR_MESSAGE,
        }
    }

    /// Kebab-case name, as used in fixtures and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::WrongLockMode => "wrong-lock-mode",
            Self::LockVersionTooOld => "lock-version-too-old",
            Self::LockVersionTooYoung => "lock-version-too-young",
            Self::LockNotFullyAssembled => "lock-not-fully-assembled",
            Self::ServerCommunicationError => "server-communication-error",
            Self::LockDateTimeInvalid => "lock-datetime-invalid",
            Self::TemporarilyUnauthorized => "temporarily-unauthorized",
            Self::UnauthorizedNotYetValid => "unauthorized-not-yet-valid",
            Self::Unauthorized => "unauthorized",
            Self::LockCommunicationError => "lock-communication-error",
            Self::UserSpecificError => "user-specific-error",
            Self::TechnicalError => "technical-error",
        }
    }
}

impl fmt::Display for CommandResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown result code name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown result code: {0}")]
pub struct UnknownResultCode(pub String);

impl FromStr for CommandResultCode {
    type Err = UnknownResultCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lock-date-time-invalid" => Ok(Self::LockDateTimeInvalid),
            _ => Self::ALL
                .into_iter()
                .find(|code| code.as_str() == s)
                .ok_or_else(|| UnknownResultCode(s.to_string())),
        }
    }
}
