//! usersvc - user service with HTTP and gRPC front ends
//!
//! Serves `POST /users/`, `GET /users/{id}`, `GET /hello` and `GET /health`
//! over HTTP and `usersvc.v1.UserService` over gRPC, both backed by one
//! PostgreSQL connection pool. Database settings come from `DB_*` variables,
//! optionally primed from an `app.env` file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{debug, info, warn};

use usersvc_core::{DbConfig, MemoryBackend, PgBackend, PoolConfig, UserRepo, UserStore};
use usersvc_server::config::{DEFAULT_HELLO_UPSTREAM, DEFAULT_RPC_PORT};
use usersvc_server::{shutdown_signal, AppContext, ServerConfig, Supervisor};

mod tracing_setup;

use tracing_setup::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(
    name = "usersvc",
    author,
    version,
    about = "User service with HTTP and gRPC front ends over one connection pool"
)]
struct Cli {
    /// HTTP bind address
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: SocketAddr,

    /// gRPC port (bound on all interfaces)
    #[arg(long, env = "RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    port: u16,

    /// Env file read before the DB_* variables (existing variables win)
    #[arg(long, default_value = "app.env")]
    env_file: PathBuf,

    /// Most connections open at once
    #[arg(long, default_value_t = 8)]
    max_open: usize,

    /// Most idle connections kept for reuse
    #[arg(long, default_value_t = 5)]
    max_idle: usize,

    /// Upper bound on one HTTP request
    #[arg(long, default_value_t = 10)]
    request_timeout_secs: u64,

    /// Grace period for each listener, and then the pool, on shutdown
    #[arg(long, default_value_t = 10)]
    shutdown_grace_secs: u64,

    /// Upstream proxied by GET /hello
    #[arg(long, env = "HELLO_UPSTREAM", default_value = DEFAULT_HELLO_UPSTREAM)]
    hello_upstream: String,

    /// Serve from an in-process store instead of PostgreSQL
    #[arg(long)]
    in_memory: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, action = ArgAction::SetTrue)]
    debug: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            http_addr: self.http_addr,
            rpc_addr: SocketAddr::from(([0, 0, 0, 0], self.port)),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            hello_upstream: self.hello_upstream.clone(),
        }
    }

    fn pool_config(&self) -> Result<PoolConfig> {
        PoolConfig::new(self.max_open, self.max_idle).context("invalid --max-open/--max-idle")
    }
}

/// Load the env file without overriding variables already set.
fn load_env_file(path: &Path) {
    match dotenvy::from_path(path) {
        Ok(()) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => debug!("No env file at {}", path.display()),
        Err(e) => warn!("Failed to read {}: {}", path.display(), e),
    }
}

async fn open_store(cli: &Cli) -> Result<Arc<dyn UserStore>> {
    let pool = cli.pool_config()?;

    if cli.in_memory {
        warn!("Serving from the in-memory store; data is lost on exit");
        let repo = UserRepo::connect(MemoryBackend::new(), pool)
            .await
            .context("failed to open in-memory store")?;
        return Ok(Arc::new(repo));
    }

    let db = DbConfig::from_env().context("database configuration incomplete")?;
    info!("Connecting to {}", db.redacted_url());
    let repo = UserRepo::connect(PgBackend::new(&db), pool)
        .await
        .with_context(|| format!("failed to connect to {}", db.redacted_url()))?;
    repo.migrate().await.context("schema migration failed")?;
    Ok(Arc::new(repo))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&TracingConfig { debug: cli.debug }).ok();
    load_env_file(&cli.env_file);

    let store = open_store(&cli).await?;
    let supervisor = Supervisor::new(AppContext::from_shared(store), cli.server_config());
    supervisor
        .run(shutdown_signal())
        .await
        .context("usersvc stopped with an error")?;

    Ok(())
}
