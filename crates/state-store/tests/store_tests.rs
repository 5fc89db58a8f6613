use std::sync::Arc;
use std::time::Duration;

use state_store::{StateStore, StoreError};
use types::DeviceSnapshot;

fn snapshot_with(value: f64) -> DeviceSnapshot {
    let mut snapshot = DeviceSnapshot::empty();
    snapshot.active_power_mw = value;
    snapshot.charged_energy_wh = value;
    snapshot.serial_number = value;
    for phase in snapshot.phase.iter_mut() {
        phase.charging_mah = value;
        phase.voltage_v = value;
    }
    snapshot
}

fn is_consistent(snapshot: &DeviceSnapshot) -> bool {
    let v = snapshot.active_power_mw;
    snapshot.charged_energy_wh == v
        && snapshot.serial_number == v
        && snapshot
            .phase
            .iter()
            .all(|phase| phase.charging_mah == v && phase.voltage_v == v)
}

#[tokio::test]
async fn read_before_first_publish_times_out() {
    let store = StateStore::new();
    assert!(!store.is_ready());
    assert!(store.try_read().is_none());

    let err = store
        .read(Duration::from_millis(20))
        .await
        .expect_err("not ready");
    assert_eq!(err, StoreError::NotReady { waited_ms: 20 });
}

#[tokio::test]
async fn waiting_reader_wakes_on_publish() {
    let store = StateStore::new();
    let reader = {
        let store = store.clone();
        tokio::spawn(async move { store.read(Duration::from_secs(5)).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    store.publish(snapshot_with(7.0));

    let snapshot = reader.await.expect("join").expect("read");
    assert_eq!(snapshot.active_power_mw, 7.0);
    assert!(store.is_ready());
}

#[tokio::test]
async fn reader_outliving_other_handles_still_reports_not_ready() {
    let store = StateStore::new();
    let reader = store.clone();
    drop(store);

    let err = reader
        .read(Duration::from_millis(20))
        .await
        .expect_err("nothing published");
    assert_eq!(err, StoreError::NotReady { waited_ms: 20 });
}

#[tokio::test]
async fn publish_replaces_previous_snapshot() {
    let store = StateStore::new();
    store.publish(snapshot_with(1.0));
    let first = store.read(Duration::from_millis(10)).await.expect("read");

    store.publish(snapshot_with(2.0));
    let second = store.read(Duration::from_millis(10)).await.expect("read");

    assert_eq!(first.active_power_mw, 1.0);
    assert_eq!(second.active_power_mw, 2.0);
    assert!(!Arc::ptr_eq(&first, &second));
}

#[test]
fn availability_and_cycle_duration_are_tracked() {
    let store = StateStore::new();
    assert!(!store.is_available());
    assert!(store.last_cycle_duration().is_none());

    store.set_available(true);
    store.record_cycle_duration(Duration::from_millis(1_800));
    assert!(store.is_available());
    assert_eq!(store.last_cycle_duration(), Some(Duration::from_millis(1_800)));

    store.set_available(false);
    assert!(!store.is_available());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_never_see_mixed_snapshots() {
    let store = StateStore::new();
    store.publish(snapshot_with(0.0));

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for cycle in 1..=500 {
                store.publish(snapshot_with(f64::from(cycle)));
                tokio::task::yield_now().await;
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        readers.push(tokio::spawn(async move {
            let mut last_seen = 0.0;
            for _ in 0..500 {
                let snapshot = store.read(Duration::from_millis(100)).await.expect("read");
                assert!(is_consistent(&snapshot));
                assert!(snapshot.active_power_mw >= last_seen);
                last_seen = snapshot.active_power_mw;
                tokio::task::yield_now().await;
            }
        }));
    }

    writer.await.expect("writer");
    for reader in readers {
        reader.await.expect("reader");
    }
}
