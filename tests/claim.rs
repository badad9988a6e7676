// tests/claim.rs

mod common;
use crate::common::builders::{PbBuilder, SbiBuilder, scan_type, seed_pb, seed_sbi};
use crate::common::{init_tracing, sessions};

use anyhow::anyhow;
use serde::Deserialize;
use serde_json::{Value, json};

use sdp_workflow::errors::WorkflowError;
use sdp_workflow::workflow::{ParameterValidator, ProcessingBlockHandle};

#[test]
fn claiming_twice_on_the_same_session_is_idempotent() {
    init_tracing();
    let (db, _controller) = sessions();
    seed_pb(&db, &PbBuilder::batch("pb-1").build());

    let first = ProcessingBlockHandle::claim(db.clone(), "pb-1").expect("first claim");
    let second = ProcessingBlockHandle::claim(db.clone(), "pb-1").expect("second claim");

    assert_eq!(first.id(), "pb-1");
    assert_eq!(second.id(), "pb-1");
    let owner = db
        .txn(|txn| txn.get_processing_block_owner("pb-1"))
        .unwrap()
        .expect("owner record");
    assert_eq!(owner.lease, db.client_lease());
}

#[test]
fn claiming_with_another_live_session_conflicts() {
    init_tracing();
    let (db, other) = sessions();
    seed_pb(&db, &PbBuilder::batch("pb-1").build());

    let _owner = ProcessingBlockHandle::claim(db.clone(), "pb-1").unwrap();
    let result = ProcessingBlockHandle::claim(other, "pb-1");

    match result {
        Err(WorkflowError::OwnershipConflict { pb_id, owner }) => {
            assert_eq!(pb_id, "pb-1");
            assert_eq!(owner, db.client_lease());
        }
        Err(e) => panic!("Expected OwnershipConflict, got: {e:?}"),
        Ok(_) => panic!("Expected OwnershipConflict, got Ok"),
    }
}

#[test]
fn exit_releases_ownership_for_the_next_session() {
    init_tracing();
    let (db, other) = sessions();
    seed_pb(&db, &PbBuilder::batch("pb-1").build());

    let pb = ProcessingBlockHandle::claim(db.clone(), "pb-1").unwrap();
    pb.exit();
    assert!(!db.is_live());

    let pb = ProcessingBlockHandle::claim(other.clone(), "pb-1").expect("claim after release");
    assert!(
        other
            .txn(|txn| txn.is_processing_block_owner(pb.id()))
            .unwrap()
    );
}

#[test]
fn claiming_a_missing_pb_is_not_found() {
    init_tracing();
    let (db, _controller) = sessions();

    let result = ProcessingBlockHandle::claim(db.clone(), "pb-missing");
    assert!(matches!(result, Err(WorkflowError::NotFound(_))));
    // Nothing was taken.
    assert!(
        db.txn(|txn| txn.get_processing_block_owner("pb-missing"))
            .unwrap()
            .is_none()
    );
}

#[derive(Debug, Deserialize, PartialEq)]
struct WorkParameters {
    length: f64,
    label: String,
}

struct RequireLength;

impl ParameterValidator for RequireLength {
    fn validate(&self, parameters: &Value) -> anyhow::Result<Value> {
        match parameters.get("length") {
            Some(Value::Number(_)) => Ok(parameters.clone()),
            _ => Err(anyhow!("length must be a number")),
        }
    }
}

#[test]
fn parameters_can_be_read_raw_typed_or_validated() {
    init_tracing();
    let (db, _controller) = sessions();
    let parameters = json!({ "length": 2.5, "label": "vis" });
    seed_pb(
        &db,
        &PbBuilder::batch("pb-1").parameters(parameters.clone()).build(),
    );
    seed_pb(
        &db,
        &PbBuilder::batch("pb-bad")
            .parameters(json!({ "length": "long" }))
            .build(),
    );

    let pb = ProcessingBlockHandle::claim(db.clone(), "pb-1").unwrap();
    assert_eq!(pb.get_parameters(), &parameters);
    assert_eq!(
        pb.get_parameters_as::<WorkParameters>().unwrap(),
        WorkParameters {
            length: 2.5,
            label: "vis".to_string()
        }
    );
    assert_eq!(pb.get_parameters_with(&RequireLength).unwrap(), parameters);

    let bad = ProcessingBlockHandle::claim(db.clone(), "pb-bad").unwrap();
    assert!(matches!(
        bad.get_parameters_as::<WorkParameters>(),
        Err(WorkflowError::Serialization(_))
    ));
    assert!(matches!(
        bad.get_parameters_with(&RequireLength),
        Err(WorkflowError::Other(_))
    ));
}

#[test]
fn scan_types_come_from_the_sbi_of_a_realtime_pb() {
    init_tracing();
    let (db, _controller) = sessions();
    seed_sbi(
        &db,
        &SbiBuilder::new("sbi-1")
            .scan_type("science_A", &[(0, 744)])
            .scan_type("calibration_B", &[(0, 10), (10, 10)])
            .build(),
    );
    seed_pb(&db, &PbBuilder::realtime("pb-rt", "sbi-1").build());
    seed_pb(&db, &PbBuilder::batch("pb-batch").build());

    let rt = ProcessingBlockHandle::claim(db.clone(), "pb-rt").unwrap();
    let scan_types = rt.get_scan_types().unwrap();
    assert_eq!(
        scan_types,
        vec![
            scan_type("science_A", &[(0, 744)]),
            scan_type("calibration_B", &[(0, 10), (10, 10)]),
        ]
    );

    let batch = ProcessingBlockHandle::claim(db.clone(), "pb-batch").unwrap();
    assert!(matches!(
        batch.get_scan_types(),
        Err(WorkflowError::Unsupported(_))
    ));
}

#[test]
fn resource_requests_have_no_side_effects() {
    init_tracing();
    let (db, _controller) = sessions();
    seed_pb(&db, &PbBuilder::batch("pb-1").build());
    let pb = ProcessingBlockHandle::claim(db.clone(), "pb-1").unwrap();
    let revision = db.backend().current_revision();

    let buffer = pb.request_buffer(100e6, &["sdm"]);
    let compute = pb.request_compute(4, &["cpu"]);

    assert_eq!(buffer.tags, vec!["sdm".to_string()]);
    assert_eq!(compute.nodes, 4);
    assert_eq!(db.backend().current_revision(), revision);

    let phase = pb.create_phase("Work", vec![buffer.into(), compute.into()]);
    assert_eq!(phase.requests().len(), 2);
    assert_eq!(db.backend().current_revision(), revision);
}
