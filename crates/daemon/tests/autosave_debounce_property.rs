use std::time::{Duration, Instant};

use proptest::prelude::*;
use vibegraph_sync::sync::{DebounceConfig, Debouncer};

const WINDOW_MS: u64 = 1_500;

/// Indices of the edits that end a burst: the last edit before a quiet gap
/// of at least one window, plus the final edit.
fn expected_fires(gaps: &[u64]) -> Vec<usize> {
    let mut fires: Vec<usize> = gaps
        .iter()
        .enumerate()
        .filter(|(_, gap)| **gap >= WINDOW_MS)
        .map(|(index, _)| index)
        .collect();
    fires.push(gaps.len());
    fires
}

fn simulate(gaps: &[u64]) -> Vec<usize> {
    let mut debouncer = Debouncer::new(DebounceConfig::with_millis(WINDOW_MS));
    let mut now = Instant::now();
    let mut fired = Vec::new();

    debouncer.schedule_at(now, 0usize);
    for (index, gap) in gaps.iter().enumerate() {
        now += Duration::from_millis(*gap);
        if let Some(payload) = debouncer.poll_at(now) {
            fired.push(payload);
        }
        debouncer.schedule_at(now, index + 1);
    }

    let deadline = debouncer.deadline().expect("last edit should leave the timer armed");
    assert!(debouncer.poll_at(deadline - Duration::from_millis(1)).is_none());
    fired.extend(debouncer.poll_at(deadline));
    fired
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn one_write_per_quiet_gap(gaps in prop::collection::vec(0u64..4_000, 0..60)) {
        prop_assert_eq!(simulate(&gaps), expected_fires(&gaps));
    }

    #[test]
    fn continuous_burst_fires_once_with_latest_payload(
        gaps in prop::collection::vec(0u64..WINDOW_MS, 1..200),
    ) {
        prop_assert_eq!(simulate(&gaps), vec![gaps.len()]);
    }
}
