use std::{collections::BTreeMap, future::IntoFuture, pin::pin, process, sync::Arc};

use outpost::{
    application::{
        error::AppError,
        lifecycle::LifecycleManager,
        messages::MessageRouter,
        network::{Network, OrderEndpoint},
        notify::Notifier,
        outbox::{OutboxQueue, RetryPolicy},
        repos::OutboxRepo,
        strategy::StrategyExecutor,
    },
    cache::{CacheConfig, CacheStoreSet, EvictionManager, SharedStoreSet},
    config,
    domain::types::StoreClass,
    infra::{
        disk_store::DiskStoreSet,
        error::InfraError,
        http::{self, RouterState, SyncOptions},
        outbox::FsOutboxRepo,
        telemetry,
        upstream::{HttpOrderEndpoint, ReqwestNetwork, build_client},
    },
    util::bytes::format_bytes,
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Sync(_) => run_sync(settings).await,
        config::Command::Evict(_) => run_evict(settings).await,
        config::Command::Status(_) => run_status(settings).await,
    }
}

struct ApplicationContext {
    stores: SharedStoreSet,
    cache: Arc<CacheConfig>,
    lifecycle: Arc<LifecycleManager>,
    strategy: Arc<StrategyExecutor>,
    messages: Arc<MessageRouter>,
    outbox: Arc<OutboxQueue>,
    notifier: Notifier,
}

fn open_stores(settings: &config::Settings) -> Result<SharedStoreSet, AppError> {
    let stores = DiskStoreSet::new(settings.cache.directory.clone())
        .map_err(|err| AppError::from(InfraError::Io(err)))?;
    Ok(Arc::new(stores))
}

fn build_outbox(settings: &config::Settings, notifier: Notifier) -> Result<Arc<OutboxQueue>, AppError> {
    let client = build_client(settings.upstream.timeout)?;
    let order_url = settings
        .upstream
        .origin
        .join(&settings.upstream.order_path)
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;
    let repo: Arc<dyn OutboxRepo> = Arc::new(
        FsOutboxRepo::new(settings.outbox.directory.clone())
            .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );
    let endpoint: Arc<dyn OrderEndpoint> = Arc::new(HttpOrderEndpoint::new(client, order_url));

    Ok(Arc::new(OutboxQueue::new(
        repo,
        endpoint,
        notifier,
        RetryPolicy::from(&settings.outbox),
    )))
}

fn build_application_context(settings: &config::Settings) -> Result<ApplicationContext, AppError> {
    let notifier = Notifier::default();
    let stores = open_stores(settings)?;
    let cache = Arc::new(CacheConfig::from(&settings.cache));
    let network: Arc<dyn Network> =
        Arc::new(ReqwestNetwork::new(build_client(settings.upstream.timeout)?));
    let origin = settings.upstream.origin.clone();

    let lifecycle = Arc::new(LifecycleManager::new(
        Arc::clone(&stores),
        Arc::clone(&network),
        notifier.clone(),
        origin.clone(),
        cache.precache.clone(),
        cache.version_set(),
        settings.lifecycle.skip_waiting,
    ));
    let strategy = Arc::new(StrategyExecutor::new(
        Arc::clone(&stores),
        network,
        Arc::clone(&lifecycle),
        notifier.clone(),
        Arc::clone(&cache),
        origin,
    ));
    let messages = Arc::new(MessageRouter::new(
        Arc::clone(&stores),
        Arc::clone(&lifecycle),
        Arc::clone(&strategy),
        notifier.clone(),
    ));
    let outbox = build_outbox(settings, notifier.clone())?;

    Ok(ApplicationContext {
        stores,
        cache,
        lifecycle,
        strategy,
        messages,
        outbox,
        notifier,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings)?;

    // A failed install keeps the version recovered from disk serving.
    match app.lifecycle.install(app.cache.version_set()).await {
        Ok(state) => info!(
            version = app.cache.version.as_str(),
            state = state.as_str(),
            "Precache installed"
        ),
        Err(err) => warn!(
            version = app.cache.version.as_str(),
            error = %err,
            "Precache install failed; continuing with existing stores"
        ),
    }

    let eviction = EvictionManager::new(Arc::clone(&app.stores), Arc::clone(&app.cache));
    let lifecycle = Arc::clone(&app.lifecycle);
    let interval = app.cache.eviction_interval;
    let eviction_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip the first immediate tick
        loop {
            ticker.tick().await;
            let versions = lifecycle.serving();
            if let Err(err) = eviction.run_pass(&versions).await {
                warn!(version = versions.version(), error = %err, "Eviction pass failed");
            }
        }
    });

    let menu_url = settings
        .upstream
        .origin
        .join(&settings.upstream.menu_path)
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;
    let router_state = RouterState {
        strategy: app.strategy,
        messages: app.messages,
        outbox: app.outbox,
        notifier: app.notifier,
        sync: SyncOptions {
            background_sync: settings.outbox.background_sync,
            fallback_delay: settings.outbox.fallback_delay,
            menu_url,
        },
    };

    let result = serve_http(&settings, router_state).await;

    eviction_handle.abort();
    let _ = eviction_handle.await;

    result
}

async fn serve_http(settings: &config::Settings, state: RouterState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        addr = %settings.server.addr,
        origin = %settings.upstream.origin,
        "Interception proxy listening"
    );

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        })
        .into_future();
    let mut server = pin!(server);

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::unexpected(format!("server error: {err}")));
        }
        () = shutdown_signal() => {}
    }

    let grace = settings.server.graceful_shutdown;
    info!(grace_seconds = grace.as_secs(), "Shutdown requested; draining connections");
    let _ = stop_tx.send(());
    match tokio::time::timeout(grace, server).await {
        Ok(result) => result.map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        Err(_) => {
            warn!("Graceful shutdown timed out; closing remaining connections");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn run_sync(settings: config::Settings) -> Result<(), AppError> {
    let outbox = build_outbox(&settings, Notifier::default())?;
    let report = outbox.drain().await?;
    info!(
        target = "outpost::sync",
        succeeded = report.succeeded,
        failed = report.failed,
        parked = report.parked,
        "Sync completed"
    );
    print_json(&report)
}

async fn run_evict(settings: config::Settings) -> Result<(), AppError> {
    let stores = open_stores(&settings)?;
    let cache = Arc::new(CacheConfig::from(&settings.cache));
    let versions = cache.version_set();
    let store = versions.name(StoreClass::Dynamic);

    let report = EvictionManager::new(stores, Arc::clone(&cache))
        .run_pass(&versions)
        .await?;
    info!(
        target = "outpost::evict",
        store = store.as_str(),
        removed = report.removed,
        reclaimed = %format_bytes(report.reclaimed_bytes),
        remaining = %format_bytes(report.after_bytes()),
        "Eviction completed"
    );
    Ok(())
}

async fn run_status(settings: config::Settings) -> Result<(), AppError> {
    let stores = open_stores(&settings)?;
    let mut counts = BTreeMap::new();
    for name in stores.store_names().await? {
        let count = stores.list_keys(&name).await?.len();
        counts.insert(name, count);
    }
    print_json(&counts)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
