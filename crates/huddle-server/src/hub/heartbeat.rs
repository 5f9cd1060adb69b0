//! Missed-pong accounting for the writer's ping ticks.

use std::time::Duration;

use tracing::debug;

use super::connection::ClientConnection;

/// What the writer does on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Still within the window: send a Ping.
    Ping,
    /// Silent for the whole window: close the connection.
    Dead,
}

/// Consecutive silent intervals tolerated before a connection is dead.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from((timeout.as_millis() / interval_ms).max(1)).unwrap_or(u32::MAX)
}

/// Per-connection liveness state, advanced once per ping tick.
#[derive(Debug)]
pub struct Heartbeat {
    limit: u32,
    missed: u32,
}

impl Heartbeat {
    /// Tolerate `timeout` of silence at one tick per `interval`.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            limit: max_missed(interval, timeout),
            missed: 0,
        }
    }

    /// Consume the alive flag the read loop sets on any ping or pong.
    pub fn on_tick(&mut self, connection: &ClientConnection) -> Beat {
        if connection.check_alive() {
            self.missed = 0;
            return Beat::Ping;
        }
        self.missed += 1;
        if self.missed < self.limit {
            return Beat::Ping;
        }
        debug!(
            conn_id = %connection.id,
            silent_for_ms = connection.last_pong_elapsed().as_millis(),
            "heartbeat timed out"
        );
        Beat::Dead
    }
}
