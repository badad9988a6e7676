use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sdp_workflow::exec::EndpointProbe;
use tracing::debug;

/// A fake endpoint probe that:
/// - records every address it was asked to probe
/// - answers with a switchable "reachable" flag, without touching the network.
#[derive(Clone, Default)]
pub struct FakeProbe {
    reachable: Arc<AtomicBool>,
    probed: Arc<Mutex<Vec<String>>>,
}

impl FakeProbe {
    pub fn reachable() -> Self {
        let probe = Self::default();
        probe.set_reachable(true);
        probe
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Addresses probed so far, in order.
    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.probed.lock().unwrap().len()
    }
}

impl EndpointProbe for FakeProbe {
    fn probe<'a>(&'a self, address: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            self.probed.lock().unwrap().push(address.to_string());
            let reachable = self.reachable.load(Ordering::SeqCst);
            debug!(%address, reachable, "fake probe");
            reachable
        })
    }
}
