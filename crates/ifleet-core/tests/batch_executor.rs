use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ifleet_core::FleetError;
use ifleet_core::batch::{BatchExecutor, BatchReport};
use ifleet_core::device::DeviceId;

fn devices(n: usize) -> Vec<DeviceId> {
    (0..n)
        .map(|i| DeviceId::new(format!("{i:08x}-00112233445566778899")).unwrap())
        .collect()
}

#[tokio::test]
async fn empty_input_returns_empty_immediately() {
    let executor = BatchExecutor::new(4).unwrap();
    let records = executor
        .run("noop", &[], |_| async { Ok::<_, FleetError>(()) })
        .await;
    assert!(records.is_empty());
}

#[tokio::test]
async fn one_record_per_device_in_input_order() {
    let executor = BatchExecutor::new(3).unwrap();
    let ids = devices(7);

    let records = executor
        .run("echo", &ids, |device| async move {
            // stagger completion so completion order differs from input order
            let nap = u64::from(device.as_str().as_bytes()[0] % 5) * 10;
            tokio::time::sleep(Duration::from_millis(nap)).await;
            Ok::<_, FleetError>(device.to_string())
        })
        .await;

    assert_eq!(records.len(), ids.len());
    for (record, id) in records.iter().zip(&ids) {
        assert_eq!(&record.device, id);
        assert!(record.success);
        assert_eq!(record.value.as_deref(), Some(id.as_str()));
    }
}

#[tokio::test]
async fn single_failure_does_not_affect_other_devices() {
    let executor = BatchExecutor::new(2).unwrap();
    let ids = devices(5);
    let poisoned = ids[2].clone();

    let records = executor
        .run("mixed", &ids, |device| {
            let poisoned = poisoned.clone();
            async move {
                if device == poisoned {
                    Err(FleetError::connection(device.as_str(), "companion down"))
                } else {
                    Ok(device.short().to_string())
                }
            }
        })
        .await;

    assert_eq!(records.len(), 5);
    assert_eq!(records.iter().filter(|r| r.success).count(), 4);
    for (record, id) in records.iter().zip(&ids) {
        assert_eq!(&record.device, id);
    }

    let failed = &records[2];
    assert!(!failed.success);
    assert!(failed.value.is_none());
    assert!(failed.error.as_deref().unwrap().contains("companion down"));
}

#[tokio::test]
async fn panic_in_one_operation_becomes_a_failed_record() {
    let executor = BatchExecutor::new(2).unwrap();
    let ids = devices(3);
    let bad = ids[1].clone();

    let records = executor
        .run("panicky", &ids, |device| {
            let bad = bad.clone();
            async move {
                if device == bad {
                    panic!("worker exploded");
                }
                Ok::<_, FleetError>(())
            }
        })
        .await;

    assert_eq!(records.len(), 3);
    assert!(records[0].success);
    assert!(!records[1].success);
    assert!(records[1].error.as_deref().unwrap().contains("worker exploded"));
    assert!(records[2].success);
}

#[tokio::test]
async fn in_flight_operations_never_exceed_worker_count() {
    let workers = 2;
    let executor = BatchExecutor::new(workers).unwrap();
    let ids = devices(8);

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let records = executor
        .run("bounded", &ids, |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, FleetError>(())
            }
        })
        .await;

    assert_eq!(records.len(), 8);
    assert!(peak.load(Ordering::SeqCst) <= workers);
}

#[tokio::test]
async fn report_over_mixed_batch() {
    let executor = BatchExecutor::new(2).unwrap();
    let ids = devices(4);
    let bad = ids[3].clone();

    let records = executor
        .run("status", &ids, |device| {
            let bad = bad.clone();
            async move {
                if device == bad {
                    Err(FleetError::Command("boom".into()))
                } else {
                    Ok("healthy")
                }
            }
        })
        .await;

    let report = BatchReport::from_records("status", &records);
    assert_eq!(report.summary.total, 4);
    assert_eq!(report.summary.succeeded, 3);
    assert_eq!(report.summary.failed_devices, vec![bad]);
    assert_eq!(report.summary.success_rate, 75.0);
}

mod ordering_property {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn records_always_match_input_length_and_order(
            n in 0usize..24,
            fail_mask in proptest::collection::vec(any::<bool>(), 24),
            workers in 1usize..6,
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let executor = BatchExecutor::new(workers).unwrap();
                let ids = devices(n);
                let mask = fail_mask.clone();

                let records = executor
                    .run("prop", &ids, |device| {
                        let mask = mask.clone();
                        let ids = ids.clone();
                        async move {
                            let index = ids.iter().position(|i| *i == device).unwrap();
                            if mask[index] {
                                Err(FleetError::Command("injected".into()))
                            } else {
                                Ok(index)
                            }
                        }
                    })
                    .await;

                assert_eq!(records.len(), n);
                for (index, (record, id)) in records.iter().zip(&ids).enumerate() {
                    assert_eq!(&record.device, id);
                    assert_eq!(record.success, !mask[index]);
                }
            });
        }
    }
}
