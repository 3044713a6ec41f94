//! Selection ranking and determinism
//!
//! Selection must be a pure function of the snapshot: identical inputs
//! give identical outputs, ordering is total (score descending, then id
//! ascending), and ineligible providers never appear.

use chrono::{Duration as ChronoDuration, Utc};
use proptest::prelude::*;

use muster::fleet::{HardwareProfile, ProviderInfo, ProviderStatus};
use muster::scheduler::{select_for_round, GpuPowerTable, SelectionParams};

fn provider(id: &str, gpu: &str, minutes: u64, reliability: f64) -> ProviderInfo {
    ProviderInfo::new(
        id,
        HardwareProfile {
            gpu_model: gpu.to_string(),
            vram_gb: 24,
            cpu_cores: 16,
            ram_gb: 64,
        },
        minutes,
        reliability,
    )
}

fn params(table: &GpuPowerTable, max_count: usize) -> SelectionParams<'_> {
    SelectionParams {
        max_count,
        round_duration_minutes: 5,
        staleness: ChronoDuration::seconds(12),
        gpu_power: table,
    }
}

#[test]
fn stronger_gpu_ranks_first() {
    let table = GpuPowerTable::default();
    let snapshot = vec![
        provider("provider-b", "RTX 3060", 20, 1.0),
        provider("provider-a", "RTX 4090", 20, 1.0),
    ];

    let selected = select_for_round(&snapshot, Utc::now(), &params(&table, 2));

    assert_eq!(selected.len(), 2);
    assert_eq!(selected[0].id, "provider-a");
    assert_eq!(selected[0].score, 1.0);
    assert_eq!(selected[1].id, "provider-b");
    assert_eq!(selected[1].score, 0.6);
}

#[test]
fn snapshot_order_does_not_matter() {
    let table = GpuPowerTable::default();
    let forward = vec![
        provider("a", "RTX 4090", 20, 1.0),
        provider("b", "RTX 3090", 30, 0.8),
        provider("c", "RTX 3060", 10, 0.9),
        provider("d", "GTX 1080", 40, 1.0),
    ];
    let mut reversed = forward.clone();
    reversed.reverse();

    let now = Utc::now();
    let from_forward = select_for_round(&forward, now, &params(&table, 3));
    let from_reversed = select_for_round(&reversed, now, &params(&table, 3));

    assert_eq!(from_forward, from_reversed);
}

#[test]
fn equal_scores_break_ties_by_ascending_id() {
    let table = GpuPowerTable::default();
    let snapshot = vec![
        provider("delta", "RTX 4090", 20, 1.0),
        provider("alpha", "RTX 4090", 20, 1.0),
        provider("charlie", "RTX 4090", 20, 1.0),
    ];

    let selected = select_for_round(&snapshot, Utc::now(), &params(&table, 3));

    let ids: Vec<&str> = selected.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "charlie", "delta"]);
}

#[test]
fn stale_and_busy_and_spent_providers_are_skipped() {
    let table = GpuPowerTable::default();

    let mut stale = provider("stale", "RTX 4090", 20, 1.0);
    stale.last_seen = Utc::now() - ChronoDuration::seconds(30);

    let mut busy = provider("busy", "RTX 4090", 20, 1.0);
    busy.status = ProviderStatus::Busy;

    let spent = provider("spent", "RTX 4090", 0, 1.0);
    let eligible = provider("eligible", "RTX 3060", 20, 1.0);

    let snapshot = vec![stale, busy, spent, eligible];
    let selected = select_for_round(&snapshot, Utc::now(), &params(&table, 4));

    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].id, "eligible");
}

#[test]
fn result_is_capped_at_max_count() {
    let table = GpuPowerTable::default();
    let snapshot: Vec<ProviderInfo> = (0..10)
        .map(|i| provider(&format!("p{i:02}"), "RTX 4090", 20, 1.0))
        .collect();

    let selected = select_for_round(&snapshot, Utc::now(), &params(&table, 3));
    assert_eq!(selected.len(), 3);
}

#[test]
fn empty_fleet_selects_nobody() {
    let table = GpuPowerTable::default();
    let selected = select_for_round(&[], Utc::now(), &params(&table, 2));
    assert!(selected.is_empty());
}

// ============================================================================
// Property Tests
// ============================================================================

fn arb_provider() -> impl Strategy<Value = ProviderInfo> {
    (
        "[a-z]{1,8}",
        0u64..200,
        0.0f64..=1.0,
        prop_oneof![
            Just("RTX 4090"),
            Just("RTX 3090"),
            Just("RTX 3060"),
            Just("GTX 1080"),
            Just("Mystery GPU"),
        ],
    )
        .prop_map(|(id, minutes, reliability, gpu)| provider(&id, gpu, minutes, reliability))
}

proptest! {
    #[test]
    fn selection_is_deterministic_and_totally_ordered(
        snapshot in proptest::collection::vec(arb_provider(), 0..24),
        max_count in 1usize..8,
    ) {
        let table = GpuPowerTable::default();
        let params = SelectionParams {
            max_count,
            round_duration_minutes: 5,
            staleness: ChronoDuration::seconds(12),
            gpu_power: &table,
        };
        let now = Utc::now();

        let first = select_for_round(&snapshot, now, &params);
        let second = select_for_round(&snapshot, now, &params);
        prop_assert_eq!(&first, &second);

        prop_assert!(first.len() <= max_count);

        for pair in first.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                prop_assert!(pair[0].id <= pair[1].id);
            }
        }
    }

    #[test]
    fn spent_budgets_never_selected(
        snapshot in proptest::collection::vec(arb_provider(), 0..24),
    ) {
        let table = GpuPowerTable::default();
        let params = SelectionParams {
            max_count: 24,
            round_duration_minutes: 5,
            staleness: ChronoDuration::seconds(12),
            gpu_power: &table,
        };

        let selected = select_for_round(&snapshot, Utc::now(), &params);

        // generated ids may collide, so check that some eligible entry backs
        // each selected candidate
        for candidate in &selected {
            prop_assert!(snapshot
                .iter()
                .any(|p| p.id == candidate.id && p.availability_minutes > 0));
        }
    }
}
