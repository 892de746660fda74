//! Wire codec: the fixed [`MessageHeader`](header::MessageHeader) and the
//! typed bodies that follow it.

pub mod header;
pub mod message;

pub use header::{HeaderError, MessageHeader, MessageType, URI_LENGTH};
pub use message::{BodyError, SegmentParameters};
