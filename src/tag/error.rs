use crate::codec::CodecError;

use super::SessionState;

/// An error that can occur while running the tag
#[derive(Debug)]
pub enum Error<E> {
    /// Error reported by the radio
    Radio(E),

    /// A poll could not be encoded
    Codec(CodecError),

    /// A session is already running
    ///
    /// Use [`Tag::restart_session`](super::Tag::restart_session) to abandon it.
    SessionInProgress(SessionState),

    /// The configuration exceeds the capacities of this crate, or contains
    /// zero counts or periods
    InvalidConfiguration,
}

impl<E> From<CodecError> for Error<E> {
    fn from(error: CodecError) -> Self {
        Error::Codec(error)
    }
}
