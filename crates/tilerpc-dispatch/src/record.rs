use std::fmt;
use std::time::Instant;

use bytes::Bytes;

use crate::address::{RpcId, TileAddress};

/// Lifecycle state of one call.
///
/// `Issued -> Running -> {Completed | Failed | TimedOut}`, or straight from
/// `Issued` to `Busy`, `Failed` or `TimedOut` when the call never runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStatus {
    Issued,
    Running,
    Completed,
    Failed,
    Busy,
    TimedOut,
}

impl CallStatus {
    /// Whether the call has reached a final state.
    pub fn is_resolved(self) -> bool {
        !matches!(self, CallStatus::Issued | CallStatus::Running)
    }

    pub fn can_advance_to(self, next: CallStatus) -> bool {
        use CallStatus::*;
        matches!(
            (self, next),
            (Issued, Running | Failed | Busy | TimedOut) | (Running, Completed | Failed | TimedOut)
        )
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallStatus::Issued => "issued",
            CallStatus::Running => "running",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Busy => "busy",
            CallStatus::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// One call, from issue to resolution.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub seq: u64,
    pub address: TileAddress,
    pub rpc_id: RpcId,
    /// Encoded argument payload.
    pub payload: Bytes,
    pub deadline: Instant,
    status: CallStatus,
}

impl CallRecord {
    pub fn new(
        seq: u64,
        address: TileAddress,
        rpc_id: RpcId,
        payload: Bytes,
        deadline: Instant,
    ) -> Self {
        Self {
            seq,
            address,
            rpc_id,
            payload,
            deadline,
            status: CallStatus::Issued,
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// Move to `next`, returning `false` (and staying put) when the
    /// transition is not allowed.
    pub fn advance(&mut self, next: CallStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn record() -> CallRecord {
        CallRecord::new(
            1,
            11,
            RpcId(0x8000),
            Bytes::new(),
            Instant::now() + Duration::from_secs(1),
        )
    }

    #[test]
    fn normal_lifecycle() {
        let mut rec = record();
        assert_eq!(rec.status(), CallStatus::Issued);
        assert!(rec.advance(CallStatus::Running));
        assert!(rec.advance(CallStatus::Completed));
        assert!(rec.status().is_resolved());
    }

    #[test]
    fn resolved_records_do_not_move() {
        let mut rec = record();
        assert!(rec.advance(CallStatus::Busy));
        assert!(!rec.advance(CallStatus::Running));
        assert!(!rec.advance(CallStatus::Completed));
        assert_eq!(rec.status(), CallStatus::Busy);
    }

    #[test]
    fn busy_only_before_running() {
        let mut rec = record();
        assert!(rec.advance(CallStatus::Running));
        assert!(!rec.advance(CallStatus::Busy));
        assert!(rec.advance(CallStatus::TimedOut));
    }

    #[test]
    fn expiry_uses_deadline() {
        let rec = record();
        assert!(!rec.is_expired(Instant::now()));
        assert!(rec.is_expired(rec.deadline));
    }
}
