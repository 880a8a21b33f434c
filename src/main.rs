use std::{future::IntoFuture, process, sync::Arc};

use reverie::{
    application::{
        engine::{self, EngineConfig, Stores},
        error::AppError,
        feed::FeedOrchestrator,
    },
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, ApiState},
        memory::InMemoryPlatform,
        telemetry,
    },
    util::clock::SystemClock,
};
use tokio::{signal, sync::Notify};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Compact(_) => run_compact(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let stores = match repositories.as_ref() {
        Some(repos) => repos.stores(),
        None => {
            warn!(
                target = "reverie::serve",
                "no database configured; running over in-memory stores"
            );
            Stores::in_memory(Arc::new(InMemoryPlatform::new()))
        }
    };

    let feed = Arc::new(build_orchestrator(stores, &settings));

    let compaction_interval = settings.interest.compaction_interval;
    let compaction = {
        let feed = feed.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(compaction_interval);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                if let Err(err) = feed.compact_interests().await {
                    warn!(
                        target = "reverie::compaction",
                        error = %err,
                        "interest compaction failed"
                    );
                }
            }
        })
    };

    let result = serve_http(&settings, ApiState::new(feed, repositories)).await;

    compaction.abort();
    let _ = compaction.await;

    result
}

async fn run_compact(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings)
        .await?
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let feed = build_orchestrator(repositories.stores(), &settings);
    let removed = feed.compact_interests().await?;
    info!(target = "reverie::compact", removed, "Compaction completed");
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::migration(err.to_string())))?;

    info!(target = "reverie::migrate", "Migrations applied");
    Ok(())
}

fn build_orchestrator(stores: Stores, settings: &config::Settings) -> FeedOrchestrator {
    engine::assemble(
        stores,
        EngineConfig::from(settings),
        Arc::new(SystemClock),
    )
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Option<Arc<PostgresRepositories>>, AppError> {
    let Some(database_url) = settings.database.url.as_ref() else {
        return Ok(None);
    };

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::migration(err.to_string())))?;

    Ok(Some(Arc::new(PostgresRepositories::new(pool))))
}

async fn serve_http(settings: &config::Settings, state: ApiState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(target = "reverie::serve", addr = %settings.server.addr, "Listening");

    let grace = settings.server.graceful_shutdown;
    let stopping = Arc::new(Notify::new());
    let trigger = stopping.clone();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            trigger.notify_one();
        })
        .into_future();

    // In-flight requests get `grace` to finish once a signal arrives.
    tokio::select! {
        result = server => result.map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        _ = async {
            stopping.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(target = "reverie::serve", "graceful shutdown timed out");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(target = "reverie::serve", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(target = "reverie::serve", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target = "reverie::serve", "shutdown signal received");
}
