use mutgate_request::{Fingerprint, OperationKind, Outcome, RequestId, TargetId};
use mutgate_store::{
    FileIdempotencyStore, IdempotencyStore, MemoryIdempotencyStore, RecordStatus, StoreError,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Op {
    Begin(u8),
    Complete(u8, bool),
    RollBack(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::Begin),
        (0u8..4, any::<bool>()).prop_map(|(id, ok)| Op::Complete(id, ok)),
        (0u8..4).prop_map(Op::RollBack),
    ]
}

fn fingerprint() -> Fingerprint {
    Fingerprint::compute(&TargetId::new("t"), OperationKind::Update, &serde_json::Value::Null)
}

/// Replays `ops` against `store` and a plain map model, checking they agree
fn check_against_model(store: &dyn IdempotencyStore, ops: &[Op]) -> Result<(), TestCaseError> {
    let mut model: HashMap<u8, RecordStatus> = HashMap::new();

    for op in ops {
        match *op {
            Op::Begin(n) => {
                let admitted = store
                    .begin_pending(&RequestId::new(format!("r{n}")), fingerprint())
                    .unwrap();
                // long retention: any existing record is live
                let expected = !model.contains_key(&n);
                prop_assert_eq!(admitted, expected);
                model.entry(n).or_insert(RecordStatus::Pending);
            }
            Op::Complete(n, ok) => {
                let outcome = if ok {
                    Outcome::success(serde_json::Value::Null)
                } else {
                    Outcome::rejected("constraint violated")
                };
                let result = store.complete(&RequestId::new(format!("r{n}")), outcome);
                match model.get(&n).copied() {
                    Some(RecordStatus::Pending) => {
                        let status = if ok { RecordStatus::Committed } else { RecordStatus::Failed };
                        prop_assert_eq!(result.unwrap().status, status);
                        model.insert(n, status);
                    }
                    Some(_) => prop_assert!(matches!(result, Err(StoreError::NotPending { .. })), "expected StoreError::NotPending, got {:?}", result),
                    None => prop_assert!(matches!(result, Err(StoreError::NotFound(_)))),
                }
            }
            Op::RollBack(n) => {
                let result = store.roll_back(&RequestId::new(format!("r{n}")), Outcome::interrupted(true));
                match model.get(&n).copied() {
                    Some(RecordStatus::Pending) => {
                        prop_assert_eq!(result.unwrap().status, RecordStatus::RolledBack);
                        model.insert(n, RecordStatus::RolledBack);
                    }
                    _ => prop_assert!(result.unwrap_err().is_misuse()),
                }
            }
        }
    }

    for (n, status) in &model {
        let record = store.lookup(&RequestId::new(format!("r{n}"))).unwrap().unwrap();
        prop_assert_eq!(record.status, *status);
        prop_assert_eq!(record.result.is_some(), status.is_terminal());
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_memory_store_matches_model(ops in prop::collection::vec(op(), 0..40)) {
        let store = MemoryIdempotencyStore::new();
        check_against_model(&store, &ops)?;
    }

    #[test]
    fn prop_file_store_matches_model_across_reopen(ops in prop::collection::vec(op(), 0..25)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.journal");

        let expected = {
            let store = FileIdempotencyStore::open(&path).unwrap();
            check_against_model(&store, &ops)?;
            let mut snapshot = store.records().unwrap();
            snapshot.sort_by(|a, b| a.request_id.cmp(&b.request_id));
            snapshot
        };

        let reopened = FileIdempotencyStore::open(&path).unwrap();
        let mut actual = reopened.records().unwrap();
        actual.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        prop_assert_eq!(actual, expected);
    }
}

#[test]
fn concurrent_begin_admits_exactly_one() {
    let store = std::sync::Arc::new(MemoryIdempotencyStore::new());
    let id = RequestId::new("storm");

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let store = store.clone();
            let id = id.clone();
            std::thread::spawn(move || store.begin_pending(&id, fingerprint()).unwrap())
        })
        .collect();

    let admitted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|admitted| *admitted)
        .count();
    assert_eq!(admitted, 1);
}

#[test]
fn expired_record_id_is_reusable_after_purge() {
    let dir = tempfile::tempdir().unwrap();
    let store =
        FileIdempotencyStore::open_with_retention(dir.path().join("j"), Duration::ZERO).unwrap();
    let id = RequestId::new("r1");

    assert!(store.begin_pending(&id, fingerprint()).unwrap());
    store.complete(&id, Outcome::interrupted(true)).unwrap();
    assert_eq!(store.purge_expired().unwrap(), 1);
    assert_eq!(store.lookup(&id).unwrap(), None);
    assert!(store.begin_pending(&id, fingerprint()).unwrap());
}
