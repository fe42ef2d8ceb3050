use pika_common::types::{fnv1a, CheckStatus, ProbeSelection};

/// Quorum for a fanout monitor: at least ⌈N/2⌉ participants must report.
fn fanout_quorum(n: u32) -> usize {
    n.div_ceil(2) as usize
}

/// Reduces one tick's participating statuses to a verdict. Pure: the same
/// inputs always produce the same verdict, so ticks are replayable.
///
/// Non-participants (timed-out or offline probes) are simply absent from
/// `statuses`. `previous` breaks fanout ties.
pub fn compute_verdict(
    selection: &ProbeSelection,
    statuses: &[CheckStatus],
    previous: CheckStatus,
) -> CheckStatus {
    let up = statuses.iter().filter(|s| **s == CheckStatus::Up).count();
    let down = statuses.iter().filter(|s| **s == CheckStatus::Down).count();

    match selection {
        // An allow-list behaves like `all` over whichever listed probes took
        // part in the tick.
        ProbeSelection::All | ProbeSelection::List { .. } => {
            if down > 0 {
                CheckStatus::Down
            } else if up > 0 && up == statuses.len() {
                CheckStatus::Up
            } else {
                CheckStatus::Unknown
            }
        }
        ProbeSelection::Any => {
            if up > 0 {
                CheckStatus::Up
            } else if down > 0 && down == statuses.len() {
                CheckStatus::Down
            } else {
                CheckStatus::Unknown
            }
        }
        ProbeSelection::Fanout { fanout } => {
            if statuses.len() < fanout_quorum(*fanout) {
                return CheckStatus::Unknown;
            }
            match up.cmp(&down) {
                std::cmp::Ordering::Greater => CheckStatus::Up,
                std::cmp::Ordering::Less => CheckStatus::Down,
                std::cmp::Ordering::Equal => previous,
            }
        }
    }
}

/// Rotation epoch for fanout probe selection; advances every 24 h so
/// locality cannot go stale.
pub fn rotation_epoch(now_ms: i64) -> i64 {
    now_ms / 86_400_000
}

/// Picks `n` probes from `candidates` by rendezvous hashing over
/// `(monitor, epoch, agent)`. Stable for a given epoch, reshuffled daily.
pub fn select_fanout_probes(
    monitor_id: &str,
    epoch: i64,
    candidates: &[String],
    n: usize,
) -> Vec<String> {
    let mut scored: Vec<(u64, &String)> = candidates
        .iter()
        .map(|agent| {
            let key = format!("{monitor_id}|{epoch}|{agent}");
            (fnv1a(key.as_bytes()), agent)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().take(n).map(|(_, a)| a.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use CheckStatus::{Down, Unknown, Up};

    #[test]
    fn all_rule_down_dominates() {
        let sel = ProbeSelection::All;
        assert_eq!(compute_verdict(&sel, &[Up, Up, Down], Up), Down);
        assert_eq!(compute_verdict(&sel, &[Up, Up, Up], Down), Up);
        assert_eq!(compute_verdict(&sel, &[Up, Unknown], Up), Unknown);
        assert_eq!(compute_verdict(&sel, &[], Up), Unknown);
    }

    #[test]
    fn any_rule_up_dominates() {
        let sel = ProbeSelection::Any;
        assert_eq!(compute_verdict(&sel, &[Down, Down, Up], Down), Up);
        assert_eq!(compute_verdict(&sel, &[Down, Down], Up), Down);
        assert_eq!(compute_verdict(&sel, &[Down, Unknown], Up), Unknown);
        assert_eq!(compute_verdict(&sel, &[], Up), Unknown);
    }

    #[test]
    fn fanout_majority_and_quorum() {
        let sel = ProbeSelection::Fanout { fanout: 3 };
        assert_eq!(compute_verdict(&sel, &[Up, Up, Down], Down), Up);
        assert_eq!(compute_verdict(&sel, &[Down, Down, Up], Up), Down);
        // One participant reported, quorum is two.
        assert_eq!(compute_verdict(&sel, &[Up], Up), Unknown);
    }

    #[test]
    fn fanout_tie_breaks_to_previous_verdict() {
        let sel = ProbeSelection::Fanout { fanout: 3 };
        // Two up, two down, one abstaining unknown: tie goes to previous.
        let tick = [Up, Up, Down, Down, Unknown];
        assert_eq!(compute_verdict(&sel, &tick, Up), Up);
        assert_eq!(compute_verdict(&sel, &tick, Down), Down);
    }

    #[test]
    fn verdict_is_deterministic() {
        let sel = ProbeSelection::Fanout { fanout: 5 };
        let tick = [Up, Down, Up, Down, Up];
        let first = compute_verdict(&sel, &tick, Unknown);
        for _ in 0..10 {
            assert_eq!(compute_verdict(&sel, &tick, Unknown), first);
        }
    }

    #[test]
    fn fanout_selection_is_stable_within_epoch() {
        let candidates: Vec<String> = (0..8).map(|i| format!("agent-{i}")).collect();
        let a = select_fanout_probes("m-1", 100, &candidates, 3);
        let b = select_fanout_probes("m-1", 100, &candidates, 3);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);

        // A different epoch may rotate the set; a different monitor hashes
        // independently of the first.
        let c = select_fanout_probes("m-2", 100, &candidates, 3);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn fanout_selection_survives_candidate_loss() {
        // Removing a non-selected candidate must not disturb the selection.
        let candidates: Vec<String> = (0..8).map(|i| format!("agent-{i}")).collect();
        let selected = select_fanout_probes("m-1", 7, &candidates, 3);
        let survivor: Vec<String> = candidates
            .iter()
            .filter(|c| selected.contains(c) || *c != &candidates[0])
            .cloned()
            .collect();
        if !selected.contains(&candidates[0]) {
            let reselected = select_fanout_probes("m-1", 7, &survivor, 3);
            assert_eq!(selected, reselected);
        }
    }
}
