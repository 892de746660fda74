//! TCP framing and the protocol-version handshake (SPEC_FULL.md A.4.2).

pub mod channel;

pub use channel::{
    ChannelError, SocketChannel, CLIENT_RECEIVE_TIMEOUT, DEFAULT_PORT, PROTOCOL_VERSION,
    SERVER_RECEIVE_TIMEOUT,
};
