mod repl;

use std::sync::Arc;
use std::time::Duration;

use hearth_core::capability::{DryRunBackend, HomeBackend, HomeDirectory, HttpHomeBackend, YamlAutomationStore};
use hearth_core::io::{CacheService, DisabledCache, HttpCacheService, StatusReceiver};
use hearth_core::memory::{MemorySessionStore, PgSessionStore, SessionStore};
use hearth_core::runtime::ShutdownGuard;
use hearth_core::{Collaborators, HearthCfg, Orchestrator};
use hearth_llm::provider::LlmProvider;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DB_CONNECT_TIMEOUT_SECS: u64 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing goes to a file so it does not interleave with the prompt.
    if std::env::var("RUST_LOG").is_ok() {
        let file = std::fs::File::create("/tmp/hearth.log")?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init();
    }

    let mut startup_notice: Option<String> = None;
    let pool = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let connect_result = tokio::time::timeout(
                Duration::from_secs(DB_CONNECT_TIMEOUT_SECS),
                sqlx::postgres::PgPoolOptions::new()
                    .max_connections(8)
                    .connect(&url),
            )
            .await;

            match connect_result {
                Ok(Ok(pool)) => match sqlx::migrate!("../../migrations").run(&pool).await {
                    Ok(()) => {
                        tracing::info!("database connected and migrations applied");
                        Some(pool)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "database migration failed, running in ephemeral mode");
                        startup_notice = Some(
                            "note: database migration failed; conversations will not be persisted.".into(),
                        );
                        None
                    }
                },
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "failed to connect DATABASE_URL, running in ephemeral mode");
                    startup_notice = Some(
                        "note: could not connect to DATABASE_URL; conversations will not be persisted.".into(),
                    );
                    None
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = DB_CONNECT_TIMEOUT_SECS,
                        "database connect timed out, running in ephemeral mode"
                    );
                    startup_notice = Some(format!(
                        "note: database connect timed out ({DB_CONNECT_TIMEOUT_SECS}s); conversations will not be persisted."
                    ));
                    None
                }
            }
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, running in ephemeral mode");
            None
        }
    };

    let cfg = match pool {
        Some(ref pool) => HearthCfg::load(pool).await?,
        None => HearthCfg::from_env(),
    };
    let cfg = Arc::new(cfg);

    let llm: Arc<dyn LlmProvider> = match hearth_llm::http::from_env() {
        Some(provider) => {
            tracing::info!(name = provider.name(), "LLM provider initialized");
            Arc::new(provider)
        }
        None => anyhow::bail!("HEARTH_LLM_MODEL and HEARTH_LLM_API_KEY must be set"),
    };

    let sessions: Arc<dyn SessionStore> = match pool {
        Some(pool) => Arc::new(PgSessionStore::new(pool)),
        None => Arc::new(MemorySessionStore::new()),
    };

    let cache: Arc<dyn CacheService> = match std::env::var("HEARTH_CACHE_KEY") {
        Ok(key) => Arc::new(HttpCacheService::new(&cfg, key)),
        Err(_) => {
            tracing::warn!("HEARTH_CACHE_KEY not set, response cache disabled");
            Arc::new(DisabledCache)
        }
    };

    let (backend, directory): (Arc<dyn HomeBackend>, Arc<dyn HomeDirectory>) =
        match std::env::var("HEARTH_HOME_TOKEN") {
            Ok(token) => {
                let home = Arc::new(HttpHomeBackend::new(
                    cfg.home_base_url.clone(),
                    token,
                    Duration::from_millis(cfg.backend_timeout_ms),
                ));
                (home.clone(), home)
            }
            Err(_) => {
                tracing::warn!("HEARTH_HOME_TOKEN not set, home actions are dry-run");
                let home = Arc::new(DryRunBackend::new());
                (home.clone(), home)
            }
        };

    let (status, status_rx) = hearth_core::io::status::channel(cfg.status_channel_capacity);
    spawn_status_logger(status_rx);

    let collaborators = Collaborators {
        sessions,
        cache,
        directory,
        backend,
        automations: Arc::new(YamlAutomationStore::new(cfg.automations_path.clone())),
        status: Arc::new(status),
    };
    let orchestrator = Orchestrator::new(cfg.clone(), llm, collaborators)?;

    let shutdown = ShutdownGuard::new();
    shutdown.spawn_signal_listener();

    repl::run(&orchestrator, &cfg, shutdown.token(), startup_notice).await
}

/// Drain speaker status updates into the log.
fn spawn_status_logger(mut rx: StatusReceiver) {
    tokio::spawn(async move {
        while let Some(status) = rx.recv().await {
            tracing::info!(
                current = %status.current,
                message = %status.message,
                response = status.response.as_deref().unwrap_or(""),
                "speaker status"
            );
        }
    });
}
