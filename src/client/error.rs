//! Errors surfaced by the client send worker and the public `Stream`/`Observer`
//! API (SPEC_FULL.md A.7).

use crate::net::ChannelError;
use crate::segmenter::SegmenterError;
use crate::wire::{BodyError, HeaderError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Segmenter(#[from] SegmenterError),

    /// A `finish_frame` was enqueued while an earlier one was still waiting
    /// for the queue to drain.
    #[error("already have pending finish")]
    AlreadyHavePendingFinish,

    /// The send worker task has terminated (its end of the channel is gone).
    #[error("send worker is no longer running")]
    WorkerGone,

    /// Connect, handshake, or any other operation failed and the caller has
    /// nothing more specific to report.
    #[error("operation failed")]
    Failed,

    /// Neither an explicit host nor `DEFLECT_HOST` was provided.
    #[error("no host provided (pass one explicitly or set DEFLECT_HOST)")]
    NoHost,
}

pub type ClientResult<T> = Result<T, ClientError>;
