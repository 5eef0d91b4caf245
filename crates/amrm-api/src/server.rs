//! Listener lifecycle: bind, report the bound address, serve until told
//! to stop.

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// A bound, not yet serving, HTTP listener.
pub struct ProtocolServer {
    name: &'static str,
    listener: TcpListener,
    router: Router,
}

impl ProtocolServer {
    /// Bind `addr`. Port 0 picks a free port; see [`Self::local_addr`].
    pub async fn bind(name: &'static str, addr: SocketAddr, router: Router) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {name} listener on {addr}"))?;
        Ok(Self {
            name,
            listener,
            router,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` changes (or its sender is dropped), then
    /// drain in-flight requests and return.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let name = self.name;
        let addr = self.local_addr()?;
        info!(server = name, %addr, "listening");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .with_context(|| format!("{name} server"))?;

        info!(server = name, "stopped");
        Ok(())
    }
}
