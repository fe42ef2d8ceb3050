use pika_common::types::{MetricKind, Sample};
use std::collections::HashMap;
use std::sync::Mutex;

/// How far in the past a sample timestamp may lie.
const MAX_PAST_MS: i64 = 5 * 60 * 1000;
/// How far in the future (clock skew allowance).
const MAX_FUTURE_MS: i64 = 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    TimestampOutOfRange,
    NonFiniteField,
    NegativeField,
    EmptyPayload,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::TimestampOutOfRange => "timestamp_out_of_range",
            RejectReason::NonFiniteField => "non_finite_field",
            RejectReason::NegativeField => "negative_field",
            RejectReason::EmptyPayload => "empty_payload",
        }
    }
}

/// Sample validation with a once-per-minute log guard per
/// `(agent, error-kind)`; malformed telemetry is dropped and counted, not
/// spammed into the log.
pub struct Validator {
    last_logged: Mutex<HashMap<(String, RejectReason), i64>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(
        &self,
        _agent_id: &str,
        _kind: MetricKind,
        sample: &Sample,
        now_ms: i64,
    ) -> Result<(), RejectReason> {
        if sample.fields.is_empty() {
            return Err(RejectReason::EmptyPayload);
        }
        if sample.timestamp < now_ms - MAX_PAST_MS || sample.timestamp > now_ms + MAX_FUTURE_MS {
            return Err(RejectReason::TimestampOutOfRange);
        }
        for value in sample.fields.values() {
            if let Some(n) = value.as_f64() {
                if !n.is_finite() {
                    return Err(RejectReason::NonFiniteField);
                }
                if n < 0.0 {
                    return Err(RejectReason::NegativeField);
                }
            }
        }
        Ok(())
    }

    pub fn log_rejection(
        &self,
        agent_id: &str,
        kind: MetricKind,
        reason: RejectReason,
        now_ms: i64,
    ) {
        let key = (agent_id.to_owned(), reason);
        let mut guard = self
            .last_logged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let should_log = match guard.get(&key) {
            Some(last) => now_ms - last >= 60_000,
            None => true,
        };
        if should_log {
            guard.insert(key, now_ms);
            tracing::warn!(
                agent_id = %agent_id,
                kind = %kind,
                reason = reason.as_str(),
                "Dropping invalid telemetry sample"
            );
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn sample(ts: i64, value: f64) -> Sample {
        let mut fields = Map::new();
        fields.insert("usagePercent".into(), value.into());
        Sample {
            timestamp: ts,
            subject: None,
            fields,
        }
    }

    #[test]
    fn accepts_in_window_sample() {
        let v = Validator::new();
        let now = 1_700_000_000_000;
        assert!(v.check("a", MetricKind::Cpu, &sample(now, 42.0), now).is_ok());
        assert!(v
            .check("a", MetricKind::Cpu, &sample(now - 4 * 60_000, 42.0), now)
            .is_ok());
    }

    #[test]
    fn rejects_out_of_window_timestamps() {
        let v = Validator::new();
        let now = 1_700_000_000_000;
        assert_eq!(
            v.check("a", MetricKind::Cpu, &sample(now - 6 * 60_000, 42.0), now),
            Err(RejectReason::TimestampOutOfRange)
        );
        assert_eq!(
            v.check("a", MetricKind::Cpu, &sample(now + 2 * 60_000, 42.0), now),
            Err(RejectReason::TimestampOutOfRange)
        );
    }

    #[test]
    fn rejects_insane_numerics() {
        let v = Validator::new();
        let now = 1_700_000_000_000;
        assert_eq!(
            v.check("a", MetricKind::Cpu, &sample(now, f64::NAN), now),
            Err(RejectReason::NonFiniteField)
        );
        assert_eq!(
            v.check("a", MetricKind::Cpu, &sample(now, -1.0), now),
            Err(RejectReason::NegativeField)
        );
    }
}
