//! Clock synchronization between the remote robot clock and the local
//! simulation clock.
//!
//! The converter is an affine map `simulationTime = a * remoteTime + b`
//! fitted over `ck` round trips. It is immutable once fitted and replaced
//! atomically on resync.

use crate::protocol::messages::ClockReplyMessage;

/// One completed `ck` round trip.
#[derive(Clone, Copy, Debug)]
pub struct ClockSyncEvent {
    /// Local clock at request transmit (ms).
    pub originate_local: i64,
    /// Remote clock at request receive (ms).
    pub remote_received: i64,
    /// Remote clock at reply transmit (ms).
    pub remote_transmitted: i64,
    /// Local clock at reply receive (ms).
    pub local_received: i64,
}

impl ClockSyncEvent {
    /// Builds the event from a clock reply.
    pub fn from_reply(reply: &ClockReplyMessage) -> Self {
        Self {
            originate_local: reply.originate_time,
            remote_received: reply.remote_received,
            remote_transmitted: reply.remote_transmitted,
            local_received: reply.local_time,
        }
    }

    /// One-way transfer latency estimate (ms).
    pub fn latency(&self) -> i64 {
        let round_trip =
            (self.local_received - self.originate_local) - (self.remote_transmitted - self.remote_received);
        round_trip.max(0) / 2
    }

    /// Local clock estimate of the moment the remote clock read
    /// `remote_received`.
    pub fn local_at_remote(&self) -> i64 {
        self.originate_local + self.latency()
    }
}

/// Affine map from remote to simulation time.
#[derive(Clone, Copy, Debug)]
pub struct ClockConverter {
    a: f64,
    b: f64,
}

impl ClockConverter {
    /// The identity conversion, used before the first sync and by the
    /// simulator.
    pub fn identity() -> Self {
        Self { a: 1.0, b: 0.0 }
    }

    /// Fits the converter over the given round trips.
    ///
    /// A single sample fixes the slope to 1; two or more samples are fitted
    /// by least squares.
    pub fn fit(events: &[ClockSyncEvent]) -> Self {
        match events {
            [] => Self::identity(),
            [e] => Self {
                a: 1.0,
                b: (e.local_at_remote() - e.remote_received) as f64,
            },
            _ => {
                let n = events.len() as f64;
                let mut sx = 0.0;
                let mut sy = 0.0;
                let mut sxx = 0.0;
                let mut sxy = 0.0;
                for e in events {
                    let x = e.remote_received as f64;
                    let y = e.local_at_remote() as f64;
                    sx += x;
                    sy += y;
                    sxx += x * x;
                    sxy += x * y;
                }
                let det = n * sxx - sx * sx;
                if det.abs() < f64::EPSILON {
                    // Degenerate samples (same remote time)
                    let e = &events[events.len() - 1];
                    return Self {
                        a: 1.0,
                        b: (e.local_at_remote() - e.remote_received) as f64,
                    };
                }
                let a = (n * sxy - sx * sy) / det;
                let b = (sy - a * sx) / n;
                Self { a, b }
            }
        }
    }

    /// Maps a remote timestamp to simulation time (ms).
    pub fn from_remote(&self, remote_time: i64) -> i64 {
        (self.a * remote_time as f64 + self.b).round() as i64
    }

    /// Maps a simulation timestamp back to the remote clock (ms).
    pub fn to_remote(&self, simulation_time: i64) -> i64 {
        ((simulation_time as f64 - self.b) / self.a).round() as i64
    }
}
