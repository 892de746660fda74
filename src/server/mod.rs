//! Server-side pipeline: per-connection framing, multi-source rendezvous and
//! the pull-model frame dispatcher (SPEC_FULL.md A.4.6-A.4.9).

pub mod acceptor;
pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod receive_buffer;
pub mod source_buffer;
pub mod worker;

pub use acceptor::Acceptor;
pub use config::ServerConfig;
pub use dispatcher::{DispatcherEvent, DispatcherHandle};
pub use handler::ServerHandler;
pub use worker::{ServerWorker, WorkerError};
