// tests/receive_addresses.rs

mod common;
use crate::common::builders::{PbBuilder, SbiBuilder, pb_state, scan_type, seed_sbi};
use crate::common::{init_tracing, seed_and_claim, sessions, with_timeout};

use serde_json::json;

use sdp_workflow::controller::grant_resources;
use sdp_workflow::errors::WorkflowError;
use sdp_workflow::workflow::receive::{dns_name, generate_receive_addresses};
use sdp_workflow::workflow::{RECEIVE_ADDRESSES_INTERFACE, ReceiveOptions};

#[test]
fn document_has_one_entry_per_channel_block() {
    let scan_types = vec![
        scan_type("science_A", &[(0, 744)]),
        scan_type("calibration_B", &[(0, 372), (372, 372)]),
    ];
    let host = dns_name("proc-pb-1-receive", "receive", "sdp");

    let doc = generate_receive_addresses(&scan_types, &host, 9000);

    assert_eq!(host, "proc-pb-1-receive-0.receive.sdp.svc.cluster.local");
    assert_eq!(
        doc,
        json!({
            "interface": "https://schema.skatelescope.org/ska-sdp-recvaddrs/0.2",
            "science_A": {
                "host": [[0, host]],
                "port": [[0, 9000, 1]]
            },
            "calibration_B": {
                "host": [[0, host], [372, host]],
                "port": [[0, 9000, 1], [372, 9000, 1]]
            }
        })
    );
    assert_eq!(doc["interface"], RECEIVE_ADDRESSES_INTERFACE);
}

#[tokio::test]
async fn addresses_are_published_to_the_pb_state_and_the_sbi() {
    init_tracing();
    let (db, controller) = sessions();
    seed_sbi(
        &db,
        &SbiBuilder::new("sbi-1").scan_type("science_A", &[(0, 4)]).build(),
    );
    let pb = seed_and_claim(&db, PbBuilder::realtime("pb-1", "sbi-1").build());
    grant_resources(&controller, "pb-1").unwrap();

    let mut phase = pb.create_phase("Work", vec![]);
    with_timeout(phase.start()).await.unwrap();
    phase.ee_deploy_helm("vis-receive", None).unwrap();

    let scan_types = pb.get_scan_types().unwrap();
    let doc = pb
        .receive_addresses(&scan_types, ReceiveOptions::default())
        .unwrap();

    // The statefulset defaults to the PB's first deployment.
    assert_eq!(
        doc["science_A"]["host"],
        json!([[0, "proc-pb-1-vis-receive-0.receive.sdp.svc.cluster.local"]])
    );
    assert_eq!(pb_state(&db, "pb-1").receive_addresses, Some(doc));
    let sbi = db
        .txn(|txn| txn.get_scheduling_block("sbi-1"))
        .unwrap()
        .unwrap();
    assert_eq!(sbi.pb_receive_addresses.as_deref(), Some("pb-1"));
}

#[test]
fn options_override_the_configured_defaults() {
    init_tracing();
    let (db, _controller) = sessions();
    seed_sbi(&db, &SbiBuilder::new("sbi-1").build());
    let pb = seed_and_claim(&db, PbBuilder::realtime("pb-1", "sbi-1").build());

    let doc = pb
        .receive_addresses(
            &[scan_type("science_A", &[(10, 1)])],
            ReceiveOptions {
                statefulset: Some("recv".to_string()),
                service: Some("headless".to_string()),
                namespace: Some("sdp-rx".to_string()),
                port: Some(21000),
            },
        )
        .unwrap();

    assert_eq!(
        doc["science_A"],
        json!({
            "host": [[10, "recv-0.headless.sdp-rx.svc.cluster.local"]],
            "port": [[10, 21000, 1]]
        })
    );
}

#[test]
fn no_deployment_falls_back_to_the_receive_name() {
    init_tracing();
    let (db, _controller) = sessions();
    seed_sbi(&db, &SbiBuilder::new("sbi-1").build());
    let pb = seed_and_claim(&db, PbBuilder::realtime("pb-1", "sbi-1").build());

    let doc = pb
        .receive_addresses(&[scan_type("science_A", &[(0, 1)])], ReceiveOptions::default())
        .unwrap();

    assert_eq!(
        doc["science_A"]["host"],
        json!([[0, "proc-pb-1-receive-0.receive.sdp.svc.cluster.local"]])
    );
}

#[test]
fn batch_workflows_have_no_receive_addresses() {
    init_tracing();
    let (db, _controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());

    let result = pb.receive_addresses(&[scan_type("science_A", &[(0, 1)])], ReceiveOptions::default());
    assert!(matches!(result, Err(WorkflowError::Unsupported(_))));
}

#[test]
fn publishing_requires_ownership() {
    init_tracing();
    let (db, _controller) = sessions();
    seed_sbi(&db, &SbiBuilder::new("sbi-1").build());
    let pb = seed_and_claim(&db, PbBuilder::realtime("pb-1", "sbi-1").build());
    db.close();

    let result = pb.receive_addresses(&[scan_type("science_A", &[(0, 1)])], ReceiveOptions::default());
    assert!(matches!(result, Err(WorkflowError::LostOwnership { .. })));
}
