//! Process supervisor
//!
//! Runs the HTTP and gRPC services as independent tasks over one
//! [`AppContext`] and drives them through
//! `Idle -> Starting -> Running -> Draining -> Stopped`:
//!
//! - starting binds both listeners; a bind failure is fatal
//! - running waits for the termination signal or for either service to exit
//! - draining stops both listeners, gives each a grace period for in-flight
//!   requests, aborts what is left, then closes the pool
//!
//! Aborting a service task stops its accept loop only. Connections it already
//! accepted run in their own tasks until the current request ends, which the
//! per-request timeout bounds on both front ends. Closing the pool waits for
//! any connection such a request still holds.
//!
//! Errors while draining are logged, never returned.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::state::AppContext;
use crate::{http, rpc};

const HTTP: &str = "HTTP";
const RPC: &str = "gRPC";

/// Lifecycle phase, observable through [`Supervisor::phase`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to bind {service} listener on {addr}: {source}")]
    Bind {
        service: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Http(#[source] io::Error),

    #[error("gRPC server failed: {0}")]
    Rpc(#[from] tonic::transport::Error),

    #[error("{service} server exited unexpectedly")]
    Exited { service: &'static str },

    #[error("{service} server task panicked: {source}")]
    Panicked {
        service: &'static str,
        #[source]
        source: JoinError,
    },
}

/// Owns the context and configuration until [`Supervisor::start`].
pub struct Supervisor {
    ctx: AppContext,
    config: ServerConfig,
    phase: watch::Sender<Phase>,
}

impl Supervisor {
    pub fn new(ctx: AppContext, config: ServerConfig) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self { ctx, config, phase }
    }

    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Bind both listeners and launch both services.
    ///
    /// On failure nothing is left running, the pool is closed and the phase
    /// is `Stopped`.
    pub async fn start(self) -> Result<Running, SupervisorError> {
        set_phase(&self.phase, Phase::Starting);

        let listeners = match bind(HTTP, self.config.http_addr).await {
            Ok(http) => bind(RPC, self.config.rpc_addr).await.map(|rpc| (http, rpc)),
            Err(e) => Err(e),
        };
        let (http_listener, rpc_listener) = match listeners {
            Ok(pair) => pair,
            Err(e) => {
                error!("{}", e);
                close_store(&self.ctx, &self.config).await;
                set_phase(&self.phase, Phase::Stopped);
                return Err(e);
            }
        };

        let http_addr = local_addr(&http_listener, self.config.http_addr);
        let rpc_addr = local_addr(&rpc_listener, self.config.rpc_addr);

        let (stop, stop_rx) = watch::channel(false);
        let app = http::build_router(self.ctx.clone(), &self.config);
        let http = tokio::spawn(http::serve(http_listener, app, stopped(stop_rx.clone())));
        let rpc = tokio::spawn(rpc::serve(
            rpc_listener,
            self.ctx.clone(),
            self.config.request_timeout,
            stopped(stop_rx),
        ));

        info!(%http_addr, %rpc_addr, "usersvc running");
        set_phase(&self.phase, Phase::Running);

        Ok(Running {
            ctx: self.ctx,
            config: self.config,
            phase: self.phase,
            stop,
            http,
            rpc,
            http_addr,
            rpc_addr,
        })
    }

    /// Start, then serve until `signal` resolves or a service exits.
    pub async fn run<F>(self, signal: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?.run_until(signal).await
    }
}

/// Both services launched
pub struct Running {
    ctx: AppContext,
    config: ServerConfig,
    phase: watch::Sender<Phase>,
    stop: watch::Sender<bool>,
    http: JoinHandle<io::Result<()>>,
    rpc: JoinHandle<Result<(), tonic::transport::Error>>,
    http_addr: SocketAddr,
    rpc_addr: SocketAddr,
}

enum Exit {
    Signal,
    Http(Result<io::Result<()>, JoinError>),
    Rpc(Result<Result<(), tonic::transport::Error>, JoinError>),
}

impl Running {
    /// Address the HTTP listener actually bound
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Address the gRPC listener actually bound
    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Serve until `signal` resolves or either service exits, then drain.
    ///
    /// A service exiting on its own is returned as an error once the rest
    /// has drained.
    pub async fn run_until<F>(self, signal: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()>,
    {
        let Running {
            ctx,
            config,
            phase,
            stop,
            mut http,
            mut rpc,
            ..
        } = self;

        let exit = tokio::select! {
            _ = signal => Exit::Signal,
            joined = &mut http => Exit::Http(joined),
            joined = &mut rpc => Exit::Rpc(joined),
        };

        // A finished JoinHandle must not be awaited again.
        let (http, rpc, outcome) = match exit {
            Exit::Signal => {
                info!("Termination signal received, draining");
                (Some(http), Some(rpc), Ok(()))
            }
            Exit::Http(joined) => {
                let err = exit_error(HTTP, joined, SupervisorError::Http);
                error!("{}", err);
                (None, Some(rpc), Err(err))
            }
            Exit::Rpc(joined) => {
                let err = exit_error(RPC, joined, SupervisorError::Rpc);
                error!("{}", err);
                (Some(http), None, Err(err))
            }
        };

        set_phase(&phase, Phase::Draining);
        stop.send_replace(true);

        tokio::join!(
            drain(HTTP, http, &config),
            drain(RPC, rpc, &config),
        );
        close_store(&ctx, &config).await;

        set_phase(&phase, Phase::Stopped);
        info!("Shutdown complete");
        outcome
    }

    /// Drain immediately.
    pub async fn shutdown(self) -> Result<(), SupervisorError> {
        self.run_until(std::future::ready(())).await
    }
}

/// Graceful shutdown signal handler: SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn set_phase(phase: &watch::Sender<Phase>, next: Phase) {
    let prev = phase.send_replace(next);
    info!(from = %prev, to = %next, "supervisor phase");
}

async fn bind(service: &'static str, addr: SocketAddr) -> Result<TcpListener, SupervisorError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| SupervisorError::Bind {
            service,
            addr,
            source,
        })
}

fn local_addr(listener: &TcpListener, requested: SocketAddr) -> SocketAddr {
    listener.local_addr().unwrap_or(requested)
}

/// Resolves once the stop flag is raised or its sender is gone.
async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

fn exit_error<E>(
    service: &'static str,
    joined: Result<Result<(), E>, JoinError>,
    wrap: fn(E) -> SupervisorError,
) -> SupervisorError {
    match joined {
        Ok(Ok(())) => SupervisorError::Exited { service },
        Ok(Err(e)) => wrap(e),
        Err(source) => SupervisorError::Panicked { service, source },
    }
}

/// Wait up to the grace period for a service to finish, then abort it.
async fn drain<E: fmt::Display>(
    service: &'static str,
    handle: Option<JoinHandle<Result<(), E>>>,
    config: &ServerConfig,
) {
    let Some(mut handle) = handle else {
        return;
    };

    match tokio::time::timeout(config.shutdown_grace, &mut handle).await {
        Ok(Ok(Ok(()))) => info!(service, "listener drained"),
        Ok(Ok(Err(e))) => error!(service, error = %e, "server failed while draining"),
        Ok(Err(e)) => error!(service, error = %e, "server task failed while draining"),
        Err(_) => {
            warn!(
                service,
                grace_secs = config.shutdown_grace.as_secs_f64(),
                "grace period elapsed, closing remaining connections"
            );
            handle.abort();
        }
    }
}

async fn close_store(ctx: &AppContext, config: &ServerConfig) {
    match tokio::time::timeout(config.shutdown_grace, ctx.store().close()).await {
        Ok(Ok(())) => info!("connection pool closed"),
        Ok(Err(e)) => error!(error = %e, "closing connection pool failed"),
        Err(_) => warn!("connection pool did not close within the grace period"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usersvc_core::{MemoryBackend, PoolConfig, UserRepo};

    async fn supervisor(backend: MemoryBackend) -> Supervisor {
        let repo = UserRepo::connect(backend, PoolConfig::default())
            .await
            .unwrap();
        Supervisor::new(AppContext::new(repo), ServerConfig::ephemeral())
    }

    #[tokio::test]
    async fn walks_every_phase() {
        let backend = MemoryBackend::new();
        let supervisor = supervisor(backend.clone()).await;
        let phase = supervisor.phase();
        assert_eq!(*phase.borrow(), Phase::Idle);

        let running = supervisor.start().await.unwrap();
        assert_eq!(*phase.borrow(), Phase::Running);
        assert_ne!(running.http_addr().port(), 0);
        assert_ne!(running.rpc_addr().port(), 0);

        running.shutdown().await.unwrap();
        assert_eq!(*phase.borrow(), Phase::Stopped);
        assert_eq!(backend.live_connections(), 0);
    }

    #[tokio::test]
    async fn bind_conflict_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend = MemoryBackend::new();
        let repo = UserRepo::connect(backend.clone(), PoolConfig::default())
            .await
            .unwrap();
        let config = ServerConfig {
            rpc_addr: taken.local_addr().unwrap(),
            ..ServerConfig::ephemeral()
        };
        let supervisor = Supervisor::new(AppContext::new(repo), config);
        let phase = supervisor.phase();

        let err = supervisor.start().await.err().unwrap();
        assert!(matches!(err, SupervisorError::Bind { service: "gRPC", .. }));
        assert_eq!(*phase.borrow(), Phase::Stopped);
        assert_eq!(backend.live_connections(), 0);
    }

    #[test]
    fn exit_error_classifies_outcomes() {
        let clean: Result<io::Result<()>, JoinError> = Ok(Ok(()));
        assert!(matches!(
            exit_error(HTTP, clean, SupervisorError::Http),
            SupervisorError::Exited { service: "HTTP" }
        ));

        let failed: Result<io::Result<()>, JoinError> =
            Ok(Err(io::Error::new(io::ErrorKind::Other, "accept failed")));
        assert!(matches!(
            exit_error(HTTP, failed, SupervisorError::Http),
            SupervisorError::Http(_)
        ));
    }
}
