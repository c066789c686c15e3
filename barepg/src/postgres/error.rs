//! Protocol error
use std::{borrow::Cow, fmt};

use super::BackendMessage;

/// An error when translating buffer from postgres
pub enum ProtocolError {
    Unexpected {
        found: u8,
        phase: Option<&'static str>,
    },
    UnknownAuth {
        auth: i32,
    },
    Malformed {
        reason: Cow<'static,str>,
    },
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Unexpected { found, phase } => {
                match BackendMessage::message_name(*found) {
                    "Unknown" => write!(f, "Unrecognized message type `{}`", found.escape_ascii())?,
                    name => write!(f, "Unexpected message `{name}`")?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::UnknownAuth { auth } => {
                write!(f, "Unknown authentication request code: R{auth}")
            },
            ProtocolError::Malformed { reason } => write!(f, "Malformed message: {reason}"),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected {
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn unknown_auth(auth: i32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }

    pub(crate) fn malformed(reason: impl Into<Cow<'static,str>>) -> ProtocolError {
        Self::Malformed { reason: reason.into() }
    }
}
