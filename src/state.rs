use std::fmt::{Display, Formatter};

/// Current state of a single-connection pool
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PoolState {
    /// The shared connection is established
    pub connected: bool,
    /// A connect attempt is in flight
    pub connecting: bool,
    /// `close()` was called
    pub closed: bool,
    /// Handles currently held
    pub in_use: u64,
    /// Connect attempts started so far
    pub connects: u64,
}

impl Display for PoolState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ connected: {}, connecting: {}, closed: {}, in_use: {}, connects: {} }}",
            self.connected, self.connecting, self.closed, self.in_use, self.connects
        )
    }
}

/// Current state of a multiplexing client
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClientState {
    /// Live connections in the managed set = idle + busy
    pub connections: u64,
    /// Connections with no lease and no pending statement
    pub idle: u64,
    /// Connections leased or running a statement
    pub busy: u64,
    /// Statements pending across all connections
    pub pending: u64,
    /// Connect attempts in flight
    pub connecting: u64,
    /// A deferred sweep is scheduled
    pub sweep_pending: bool,
    /// `close()` was called
    pub closed: bool,
}

impl Display for ClientState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ connections: {}, idle: {}, busy: {}, pending: {}, connecting: {}, sweep_pending: {}, closed: {} }}",
            self.connections,
            self.idle,
            self.busy,
            self.pending,
            self.connecting,
            self.sweep_pending,
            self.closed
        )
    }
}
