//! Daemon assembly.
//!
//! Wires the heartbeat service to its collaborators, binds the protocol
//! and admin listeners, and drains attempt events. An attempt that
//! finishes is retired from the response cache once its unregistration
//! event comes through; everything else is only logged.

use std::net::SocketAddr;
use std::sync::Arc;

use amrm_api::{ApiState, ProtocolServer, admin_router, protocol_router};
use amrm_core::AmrmConfig;
use amrm_service::*;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::standalone::{IdleScheduler, OpenAppRegistry};

pub struct Daemon {
    protocol_addr: SocketAddr,
    admin_addr: SocketAddr,
    service: Arc<HeartbeatService>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<anyhow::Result<()>>)>,
}

impl Daemon {
    /// Bind both listeners and start serving.
    pub async fn start(config: &AmrmConfig) -> anyhow::Result<Self> {
        let scheduler = Arc::new(IdleScheduler::from_config(&config.scheduler)?);
        let liveness = Arc::new(PingRecorder::new());
        let apps = Arc::new(InMemoryAppRegistry::new());
        let (dispatcher, events) = ChannelDispatcher::channel();

        let service = Arc::new(HeartbeatService::new(
            Arc::new(AttemptResponseCache::new()),
            AccessGuard::new(config.security.enabled),
            Collaborators {
                scheduler,
                liveness: liveness.clone(),
                dispatcher: Arc::new(dispatcher),
                apps: Arc::new(OpenAppRegistry::new(apps)),
            },
        ));

        let state = ApiState::new(service.clone(), &config.security.identity_header)?;
        let protocol =
            ProtocolServer::bind("protocol", config.server.address, protocol_router(state.clone()))
                .await?;
        let admin =
            ProtocolServer::bind("admin", config.server.admin_address, admin_router(state)).await?;
        let protocol_addr = protocol.local_addr()?;
        let admin_addr = admin.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            ("protocol", tokio::spawn(protocol.run(shutdown_rx.clone()))),
            ("admin", tokio::spawn(admin.run(shutdown_rx.clone()))),
            (
                "events",
                tokio::spawn(drain_events(events, service.clone(), liveness, shutdown_rx)),
            ),
        ];

        Ok(Self {
            protocol_addr,
            admin_addr,
            service,
            shutdown: shutdown_tx,
            tasks,
        })
    }

    pub fn protocol_addr(&self) -> SocketAddr {
        self.protocol_addr
    }

    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    pub fn service(&self) -> &Arc<HeartbeatService> {
        &self.service
    }

    /// Stop accepting requests, let in-flight ones finish, and wait for
    /// every task. Returns the first task failure.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);

        let mut first_error = None;
        for (name, task) in self.tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("{name} task panicked: {e}")),
            };
            if let Err(e) = result {
                tracing::error!(task = name, error = %e, "task failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("daemon stopped");
                Ok(())
            }
        }
    }
}

/// Serve until ctrl-c.
pub async fn run(config: AmrmConfig) -> anyhow::Result<()> {
    let daemon = Daemon::start(&config).await?;
    info!(
        protocol = %daemon.protocol_addr(),
        admin = %daemon.admin_addr(),
        security = daemon.service().security_enabled(),
        "amrmd started"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    daemon.shutdown().await
}

async fn drain_events(
    mut events: mpsc::UnboundedReceiver<AttemptEvent>,
    service: Arc<HeartbeatService>,
    liveness: Arc<PingRecorder>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_event(&service, &liveness, event),
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("event drain stopped");
    Ok(())
}

fn handle_event(service: &HeartbeatService, liveness: &PingRecorder, event: AttemptEvent) {
    match event {
        AttemptEvent::Registration {
            attempt_id,
            host,
            rpc_port,
            tracking_url,
        } => {
            info!(%attempt_id, %host, rpc_port, %tracking_url, "application master registered");
        }
        AttemptEvent::StatusUpdate {
            attempt_id,
            progress,
        } => {
            trace!(%attempt_id, progress, "status update");
        }
        AttemptEvent::Unregistration {
            attempt_id,
            final_status,
            diagnostics,
            ..
        } => {
            info!(%attempt_id, ?final_status, %diagnostics, "application master finished");
            service.unregister_attempt(&attempt_id);
            liveness.forget(&attempt_id);
        }
    }
}
