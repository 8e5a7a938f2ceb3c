//! Broadcast fan-out with per-channel replay buffers.
//!
//! Producers never block: events go to a `tokio::sync::broadcast` channel
//! and a bounded ring buffer. Slow subscribers lag and drop on their own
//! receiver; the engine is unaffected. Subscribers may request a replay of
//! the ring on subscription; replayed events are flagged.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::trace;

pub const DEFAULT_REPLAY_LIMIT: usize = 256;
const BROADCAST_CAPACITY: usize = 1024;

/// Telemetry channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    TraderStatus,
    TraderPosition,
    MarketData,
    SystemEvent,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::TraderStatus,
        Channel::TraderPosition,
        Channel::MarketData,
        Channel::SystemEvent,
    ];

    fn index(self) -> usize {
        match self {
            Self::TraderStatus => 0,
            Self::TraderPosition => 1,
            Self::MarketData => 2,
            Self::SystemEvent => 3,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TraderStatus => write!(f, "trader-status"),
            Self::TraderPosition => write!(f, "trader-position"),
            Self::MarketData => write!(f, "market-data"),
            Self::SystemEvent => write!(f, "system-event"),
        }
    }
}

/// One published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub channel: Channel,
    pub timestamp: DateTime<Utc>,
    /// True when delivered from the replay buffer rather than live.
    pub replay: bool,
    pub payload: Value,
}

struct ChannelState {
    tx: broadcast::Sender<TelemetryEvent>,
    ring: Mutex<VecDeque<TelemetryEvent>>,
}

/// Process-wide telemetry broadcaster.
///
/// Constructed once at startup and shared by reference; see the
/// application assembly.
pub struct TelemetryHub {
    channels: [ChannelState; 4],
    replay_limit: usize,
}

impl TelemetryHub {
    pub fn new(replay_limit: usize) -> Self {
        let state = || ChannelState {
            tx: broadcast::channel(BROADCAST_CAPACITY).0,
            ring: Mutex::new(VecDeque::with_capacity(replay_limit)),
        };
        Self {
            channels: [state(), state(), state(), state()],
            replay_limit,
        }
    }

    /// Publish a pre-serialized payload. Never blocks; delivery failures
    /// (no subscribers) are silently dropped.
    pub fn publish(&self, channel: Channel, payload: Value) {
        let event = TelemetryEvent {
            channel,
            timestamp: Utc::now(),
            replay: false,
            payload,
        };

        let state = &self.channels[channel.index()];
        {
            let mut ring = state.ring.lock();
            if ring.len() >= self.replay_limit {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }

        match state.tx.send(event) {
            Ok(n) => trace!(%channel, receivers = n, "telemetry event sent"),
            Err(_) => trace!(%channel, "no telemetry receivers"),
        }
    }

    /// Serialize and publish. Serialization failures are swallowed: telemetry
    /// must never fail the engine.
    pub fn publish_json<T: Serialize>(&self, channel: Channel, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => self.publish(channel, value),
            Err(e) => trace!(%channel, error = %e, "telemetry serialization failed"),
        }
    }

    /// Subscribe to a channel, optionally replaying the buffered events.
    ///
    /// Replayed events come flagged with `replay = true`.
    pub fn subscribe(
        &self,
        channel: Channel,
        replay: bool,
    ) -> (Vec<TelemetryEvent>, broadcast::Receiver<TelemetryEvent>) {
        let state = &self.channels[channel.index()];
        let rx = state.tx.subscribe();
        let buffered = if replay {
            state
                .ring
                .lock()
                .iter()
                .cloned()
                .map(|mut e| {
                    e.replay = true;
                    e
                })
                .collect()
        } else {
            Vec::new()
        };
        (buffered, rx)
    }

    /// Number of buffered events on a channel.
    pub fn buffered(&self, channel: Channel) -> usize {
        self.channels[channel.index()].ring.lock().len()
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_LIMIT)
    }
}
