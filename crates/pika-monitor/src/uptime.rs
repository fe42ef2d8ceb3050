use anyhow::Result;
use pika_common::types::CheckStatus;
use pika_storage::{PikaStore, VerdictRow};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const DAY_MS: i64 = 86_400_000;

/// Read-only uptime and response-time statistics for one monitor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeStats {
    pub monitor_id: String,
    /// Percentage to three decimals; `None` when the window holds no
    /// decisive tick.
    pub uptime_24h: Option<f64>,
    pub uptime_30d: Option<f64>,
    pub avg_response_24h: Option<f64>,
    /// The most recent `up` verdict's minimum latency, `None` when the last
    /// verdict is not `up`.
    pub current_response: Option<i64>,
    /// Soonest TLS expiry in days, surfaced once it is 30 days out or less.
    pub cert_expiry_days: Option<i64>,
}

/// Pure derivation over monitor verdicts, memoized per
/// `(monitor, minute)` so dashboard polling does not re-scan history.
pub struct UptimeComputer {
    store: Arc<PikaStore>,
    cache: Mutex<HashMap<(String, i64), UptimeStats>>,
}

impl UptimeComputer {
    pub fn new(store: Arc<PikaStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn stats(&self, monitor_id: &str, now_ms: i64) -> Result<UptimeStats> {
        let minute = now_ms / 60_000;
        let key = (monitor_id.to_owned(), minute);
        {
            let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }

        let verdicts_30d = self
            .store
            .list_verdicts(monitor_id, now_ms - 30 * DAY_MS, now_ms)
            .await?;
        let stats = derive(monitor_id, &verdicts_30d, now_ms);

        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        // The cache only ever needs the current minute per monitor.
        cache.retain(|(_, m), _| *m == minute);
        cache.insert(key, stats.clone());
        Ok(stats)
    }
}

/// Uptime percentage over a slice of verdicts. `unknown` ticks count toward
/// neither numerator nor denominator.
fn uptime_percent(verdicts: &[&VerdictRow]) -> Option<f64> {
    let up = verdicts
        .iter()
        .filter(|v| v.status == CheckStatus::Up)
        .count();
    let down = verdicts
        .iter()
        .filter(|v| v.status == CheckStatus::Down)
        .count();
    let decisive = up + down;
    if decisive == 0 {
        return None;
    }
    let pct = up as f64 / decisive as f64 * 100.0;
    Some((pct * 1000.0).round() / 1000.0)
}

fn derive(monitor_id: &str, verdicts_30d: &[VerdictRow], now_ms: i64) -> UptimeStats {
    let cutoff_24h = now_ms - DAY_MS;
    let last_24h: Vec<&VerdictRow> = verdicts_30d
        .iter()
        .filter(|v| v.tick_at >= cutoff_24h)
        .collect();
    let all: Vec<&VerdictRow> = verdicts_30d.iter().collect();

    let up_latencies_24h: Vec<i64> = last_24h
        .iter()
        .filter(|v| v.status == CheckStatus::Up)
        .filter_map(|v| v.min_latency_ms)
        .collect();
    let avg_response_24h = if up_latencies_24h.is_empty() {
        None
    } else {
        Some(up_latencies_24h.iter().sum::<i64>() as f64 / up_latencies_24h.len() as f64)
    };

    let last = verdicts_30d.last();
    let current_response = match last {
        Some(v) if v.status == CheckStatus::Up => v.min_latency_ms,
        _ => None,
    };
    let cert_expiry_days = last
        .and_then(|v| v.cert_expiry_days)
        .filter(|days| *days <= 30);

    UptimeStats {
        monitor_id: monitor_id.to_owned(),
        uptime_24h: uptime_percent(&last_24h),
        uptime_30d: uptime_percent(&all),
        avg_response_24h,
        current_response,
        cert_expiry_days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(tick_at: i64, status: CheckStatus, latency: Option<i64>) -> VerdictRow {
        VerdictRow {
            id: format!("v-{tick_at}"),
            monitor_id: "m-1".into(),
            tick_at,
            status,
            participant_count: 1,
            down_count: if status == CheckStatus::Down { 1 } else { 0 },
            min_latency_ms: latency,
            max_latency_ms: latency,
            cert_expiry_days: None,
        }
    }

    #[test]
    fn uptime_excludes_unknown_ticks() {
        let now = 1_700_000_000_000;
        let rows = vec![
            verdict(now - 3_000, CheckStatus::Up, Some(20)),
            verdict(now - 2_000, CheckStatus::Unknown, None),
            verdict(now - 1_000, CheckStatus::Down, None),
        ];
        let stats = derive("m-1", &rows, now);
        // 1 up of 2 decisive ticks: exactly 50%.
        assert_eq!(stats.uptime_24h, Some(50.0));
        assert_eq!(stats.uptime_30d, Some(50.0));
    }

    #[test]
    fn uptime_rounds_to_three_decimals() {
        let now = 1_700_000_000_000;
        let mut rows: Vec<VerdictRow> = (0..3)
            .map(|i| verdict(now - 10_000 + i, CheckStatus::Up, Some(10)))
            .collect();
        rows.push(verdict(now - 1_000, CheckStatus::Down, None));
        let stats = derive("m-1", &rows, now);
        // 3/4 = 75%; 2/3 would be 66.667.
        assert_eq!(stats.uptime_24h, Some(75.0));

        let rows = vec![
            verdict(now - 3_000, CheckStatus::Up, Some(10)),
            verdict(now - 2_000, CheckStatus::Up, Some(10)),
            verdict(now - 1_000, CheckStatus::Down, None),
        ];
        let stats = derive("m-1", &rows, now);
        assert_eq!(stats.uptime_24h, Some(66.667));
    }

    #[test]
    fn current_response_requires_up_tail() {
        let now = 1_700_000_000_000;
        let rows = vec![
            verdict(now - 2_000, CheckStatus::Up, Some(25)),
            verdict(now - 1_000, CheckStatus::Down, None),
        ];
        let stats = derive("m-1", &rows, now);
        assert_eq!(stats.current_response, None);

        let rows = vec![
            verdict(now - 2_000, CheckStatus::Down, None),
            verdict(now - 1_000, CheckStatus::Up, Some(25)),
        ];
        let stats = derive("m-1", &rows, now);
        assert_eq!(stats.current_response, Some(25));
    }

    #[test]
    fn avg_response_uses_up_verdicts_only() {
        let now = 1_700_000_000_000;
        let rows = vec![
            verdict(now - 3_000, CheckStatus::Up, Some(10)),
            verdict(now - 2_000, CheckStatus::Down, Some(500)),
            verdict(now - 1_000, CheckStatus::Up, Some(30)),
        ];
        let stats = derive("m-1", &rows, now);
        assert_eq!(stats.avg_response_24h, Some(20.0));
    }

    #[test]
    fn cert_expiry_surfaces_only_within_thirty_days() {
        let now = 1_700_000_000_000;
        let mut far = verdict(now - 1_000, CheckStatus::Up, Some(10));
        far.cert_expiry_days = Some(90);
        let stats = derive("m-1", &[far], now);
        assert_eq!(stats.cert_expiry_days, None);

        let mut near = verdict(now - 1_000, CheckStatus::Up, Some(10));
        near.cert_expiry_days = Some(12);
        let stats = derive("m-1", &[near], now);
        assert_eq!(stats.cert_expiry_days, Some(12));
    }
}
