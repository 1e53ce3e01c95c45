use std::any::Any;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::event::EventKind;

/// Result alias used throughout rivet.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by buffers, pipelines and handlers.
///
/// `Error` is `Clone` so the same failure can complete a [`ChannelFuture`](crate::ChannelFuture)
/// and travel upstream as an `exception_caught` event.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An index, capacity or length constraint was violated.
    #[error("{0}")]
    Range(String),

    /// A structural precondition was violated (duplicate name, mixed byte order, ...).
    #[error("{0}")]
    Argument(String),

    /// The named handler or element does not exist.
    #[error("{0}")]
    NoSuchElement(String),

    /// The operation is not valid in the current lifecycle state.
    #[error("{0}")]
    IllegalState(String),

    /// A handler lifecycle hook failed.
    #[error("{message}")]
    Lifecycle {
        /// Which hook failed, on which handler, and what the pipeline did about it.
        message: String,
        /// The error returned by the hook.
        source: Box<Error>,
    },

    /// A handler returned an error (or panicked) while handling an event.
    #[error("{handler} threw during {event}: {source}")]
    Handler {
        /// The event being handled.
        event: EventKind,
        /// Name of the context the handler occupies.
        handler: String,
        /// The handler's error.
        source: Box<Error>,
    },

    /// An outbound operation found nothing to handle it.
    #[error("has no handler to handle to {0}")]
    NoHandler(String),

    /// A frame could not be decoded.
    #[error("{0}")]
    Decode(String),

    /// The channel or event loop has been closed.
    #[error("channel closed")]
    Closed,

    /// Transport failure.
    #[error("i/o error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// Failure of unknown origin, such as a panic caught at a dispatch boundary.
    #[error("{0}")]
    Unknown(String),
}

impl Error {
    pub fn range(msg: impl Into<String>) -> Self {
        Self::Range(msg.into())
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    pub fn no_such_element(msg: impl Into<String>) -> Self {
        Self::NoSuchElement(msg.into())
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn lifecycle(message: impl Into<String>, source: Error) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn handler(event: EventKind, handler: &str, source: Error) -> Self {
        Self::Handler {
            event,
            handler: handler.to_owned(),
            source: Box::new(source),
        }
    }

    /// Converts a panic payload caught with `catch_unwind` into an error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_owned()
        };
        Self::Unknown(msg)
    }

    /// Returns the innermost error, unwrapping lifecycle and handler wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Lifecycle { source, .. } | Self::Handler { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
