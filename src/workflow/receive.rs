// src/workflow/receive.rs

//! Receive address document for realtime workflows.
//!
//! Consumers validate this document against a versioned schema, so the
//! shape and the interface string must stay exactly as produced here:
//!
//! ```json
//! {
//!   "interface": "https://schema.skatelescope.org/ska-sdp-recvaddrs/0.2",
//!   "science_A": {
//!     "host": [[0, "proc-pb-1-receive-0.receive.sdp.svc.cluster.local"]],
//!     "port": [[0, 9000, 1]]
//!   }
//! }
//! ```

use serde_json::{Map, Value, json};

use crate::store::ScanType;

pub const RECEIVE_ADDRESSES_INTERFACE: &str =
    "https://schema.skatelescope.org/ska-sdp-recvaddrs/0.2";

/// Overrides for receive address generation. Unset fields fall back to the
/// configured defaults.
#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    /// Name of the receive statefulset.
    pub statefulset: Option<String>,
    /// Name of the headless service in front of it.
    pub service: Option<String>,
    /// Kubernetes namespace.
    pub namespace: Option<String>,
    pub port: Option<u16>,
}

/// DNS name of the first pod of a statefulset behind a headless service.
pub fn dns_name(statefulset: &str, service: &str, namespace: &str) -> String {
    format!("{statefulset}-0.{service}.{namespace}.svc.cluster.local")
}

/// Build the receive address document: every channel block of every scan
/// type is received by `host` on `port`.
pub fn generate_receive_addresses(scan_types: &[ScanType], host: &str, port: u16) -> Value {
    let mut doc = Map::new();
    doc.insert(
        "interface".to_string(),
        Value::String(RECEIVE_ADDRESSES_INTERFACE.to_string()),
    );
    for scan_type in scan_types {
        let hosts: Vec<Value> = scan_type
            .channels
            .iter()
            .map(|block| json!([block.start, host]))
            .collect();
        let ports: Vec<Value> = scan_type
            .channels
            .iter()
            .map(|block| json!([block.start, port, 1]))
            .collect();
        doc.insert(scan_type.id.clone(), json!({ "host": hosts, "port": ports }));
    }
    Value::Object(doc)
}
