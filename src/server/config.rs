//! Server-side configuration (SPEC_FULL.md B.10.3).

use crate::net::{DEFAULT_PORT, SERVER_RECEIVE_TIMEOUT};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub receive_timeout: Duration,
    pub event_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            receive_timeout: SERVER_RECEIVE_TIMEOUT,
            event_queue_capacity: 16,
        }
    }
}
