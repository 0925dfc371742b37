use daybook::db::init_db;
use daybook::domain::{Decimal, GroupConfig, GroupId, RecordAmount, RecordRequest, TimeMs};
use daybook::engine::BusinessClock;
use daybook::{BusinessDate, CancelTarget, Ledger, LedgerSettings, MockRateProvider, Repository};
use futures::future::try_join_all;
use std::sync::Arc;
use tempfile::TempDir;

/// 2024-03-10 12:00 at UTC+8.
const MIDDAY: i64 = 1_710_043_200_000;
const MINUTE: i64 = 60_000;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn date(s: &str) -> BusinessDate {
    s.parse().unwrap()
}

async fn setup() -> (Arc<Ledger>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("ledger.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let provider = MockRateProvider::new().with_group(GroupConfig {
        group_id: GroupId::new("g1"),
        fee_rate: d("2"),
        in_rate: d("62.5"),
        out_rate: d("62.4"),
        handling_fee: d("5"),
        is_open: true,
    });
    let ledger = Ledger::new(
        Arc::new(Repository::new(pool)),
        Arc::new(provider),
        BusinessClock::default(),
        LedgerSettings {
            max_conflict_retries: 20,
            ..LedgerSettings::default()
        },
    );
    (Arc::new(ledger), temp_dir)
}

fn request(i: i64) -> RecordRequest {
    // g2 has no inbound rate, so it only receives dispatches.
    let (group, amount) = match (i % 2, i % 3) {
        (1, _) => (
            "g2",
            RecordAmount::Dispatch {
                usdt_amount: Decimal::from(i),
            },
        ),
        (_, 0) => (
            "g1",
            RecordAmount::Dispatch {
                usdt_amount: Decimal::from(i + 1),
            },
        ),
        _ => (
            "g1",
            RecordAmount::Inbound {
                local_amount: Decimal::from(1000 * (i + 1)),
            },
        ),
    };
    RecordRequest::new(GroupId::new(group), amount).at(TimeMs::new(MIDDAY + i * MINUTE))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_records_match_sequential_result() {
    const N: i64 = 24;

    let (parallel, _temp_a) = setup().await;
    let handles = (0..N).map(|i| {
        let ledger = parallel.clone();
        tokio::spawn(async move { ledger.record_transaction(request(i)).await })
    });
    let results = try_join_all(handles).await.unwrap();
    for result in results {
        result.unwrap();
    }

    let (sequential, _temp_b) = setup().await;
    for i in 0..N {
        sequential.record_transaction(request(i)).await.unwrap();
    }

    let day = date("2024-03-10");
    let a = parallel.get_daily_totals(day).await.unwrap().unwrap();
    let b = sequential.get_daily_totals(day).await.unwrap().unwrap();
    assert_eq!(a.sums, b.sums);
    assert_eq!(a.sums.incoming_count + a.sums.outgoing_count, N);
    assert_eq!(a.version, N);

    for group in ["g1", "g2"] {
        let a = parallel
            .get_group_aggregate(day, &GroupId::new(group))
            .await
            .unwrap()
            .unwrap();
        let b = sequential
            .get_group_aggregate(day, &GroupId::new(group))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.sums, b.sums, "group {}", group);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_cancels_and_rebuild_agree() {
    const N: i64 = 16;

    let (ledger, _temp) = setup().await;
    let mut ids = Vec::new();
    for i in 0..N {
        ids.push(ledger.record_transaction(request(i)).await.unwrap().id);
    }

    // Cancel every other transaction while a rebuild of the same day runs.
    let day = date("2024-03-10");
    let cancels = ids.iter().step_by(2).map(|id| {
        let ledger = ledger.clone();
        let id = *id;
        tokio::spawn(async move { ledger.cancel_transaction(CancelTarget::Id(id)).await })
    });
    let rebuild = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.rebuild_range(day, day).await })
    };
    for result in try_join_all(cancels).await.unwrap() {
        result.unwrap();
    }
    rebuild.await.unwrap().unwrap();

    let incremental = ledger.get_daily_totals(day).await.unwrap().unwrap();
    ledger.rebuild_range(day, day).await.unwrap();
    let rebuilt = ledger.get_daily_totals(day).await.unwrap().unwrap();
    assert_eq!(incremental.sums, rebuilt.sums);
    assert_eq!(
        rebuilt.sums.incoming_count + rebuilt.sums.outgoing_count,
        N / 2
    );
}
