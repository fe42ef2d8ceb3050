use pika_common::frames::AgentFrame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Per-session inbound queue: bounded single-consumer, depth 128.
///
/// Overflow drops the oldest telemetry frame and counts the loss; a
/// `checkResult` frame is never dropped (the queue grows past the bound in
/// the degenerate all-checkResult case rather than lose a vote).
pub struct InboundQueue {
    frames: Mutex<VecDeque<AgentFrame>>,
    notify: Notify,
    capacity: usize,
    pub lost: AtomicU64,
}

pub const QUEUE_DEPTH: usize = 128;

impl InboundQueue {
    pub fn new() -> Self {
        Self::with_capacity(QUEUE_DEPTH)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            lost: AtomicU64::new(0),
        }
    }

    pub fn push(&self, frame: AgentFrame) {
        {
            let mut frames = self
                .frames
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if frames.len() >= self.capacity {
                let oldest_telemetry = frames
                    .iter()
                    .position(|f| matches!(f, AgentFrame::Telemetry { .. }));
                if let Some(idx) = oldest_telemetry {
                    frames.remove(idx);
                    self.lost.fetch_add(1, Ordering::Relaxed);
                }
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Awaits the next frame. Single consumer only.
    pub async fn pop(&self) -> AgentFrame {
        loop {
            {
                let mut frames = self
                    .frames
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(frame) = frames.pop_front() {
                    return frame;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pika_common::frames::CheckReport;
    use pika_common::types::{CheckStatus, MetricKind};

    fn telemetry(n: usize) -> AgentFrame {
        AgentFrame::Telemetry {
            kind: MetricKind::Cpu,
            samples: vec![pika_common::types::Sample {
                timestamp: n as i64,
                subject: None,
                fields: serde_json::Map::new(),
            }],
        }
    }

    fn check_result(n: i64) -> AgentFrame {
        AgentFrame::CheckResult(CheckReport {
            monitor_id: format!("m-{n}"),
            started_at: n,
            latency_ms: 1,
            status: CheckStatus::Up,
            http_code: None,
            tls_expiry_at: None,
            error: None,
        })
    }

    #[test]
    fn overflow_drops_oldest_telemetry_and_counts() {
        let queue = InboundQueue::with_capacity(4);
        for i in 0..4 {
            queue.push(telemetry(i));
        }
        queue.push(telemetry(4));

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.lost.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn check_results_are_never_dropped() {
        let queue = InboundQueue::with_capacity(4);
        queue.push(telemetry(0));
        for i in 0..3 {
            queue.push(check_result(i));
        }
        // Overflow: the single telemetry frame is evicted, not a vote.
        queue.push(check_result(3));
        assert_eq!(queue.len(), 4);

        // All remaining frames are check results; a further push grows the
        // queue instead of losing one.
        queue.push(check_result(4));
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.lost.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn pop_yields_frames_in_order() {
        let queue = InboundQueue::new();
        queue.push(telemetry(1));
        queue.push(check_result(2));

        assert!(matches!(queue.pop().await, AgentFrame::Telemetry { .. }));
        assert!(matches!(queue.pop().await, AgentFrame::CheckResult(_)));
    }
}
