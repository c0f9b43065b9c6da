//! ==============================================================================
//! network.rs - network readiness signal
//! ==============================================================================
//!
//! the sync engine sits in Disconnected until this signal turns true. link
//! bring-up itself is somebody else's job; the probe below only checks that
//! the shadow endpoint is reachable.
//!
//! ==============================================================================

use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone)]
pub struct NetworkReady {
    rx: watch::Receiver<bool>,
}

pub struct NetworkSignal {
    tx: watch::Sender<bool>,
}

pub fn readiness() -> (NetworkSignal, NetworkReady) {
    let (tx, rx) = watch::channel(false);
    (NetworkSignal { tx }, NetworkReady { rx })
}

impl NetworkSignal {
    pub fn set_ready(&self, ready: bool) {
        self.tx.send_replace(ready);
    }
}

impl NetworkReady {
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// resolves once the network is up. if the signal side is dropped
    /// before that, this never resolves.
    pub async fn wait_ready(&mut self) {
        if self.rx.wait_for(|ready| *ready).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// mark the network ready once a tcp connection to `addr` succeeds
pub fn spawn_probe(signal: NetworkSignal, addr: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match tokio::net::TcpStream::connect(&addr).await {
                Ok(_) => {
                    tracing::info!("[NET] endpoint {} reachable", addr);
                    signal.set_ready(true);
                    return;
                }
                Err(e) => {
                    tracing::debug!("[NET] waiting for {}: {}", addr, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}
