use actix_server::ServerHandle;
use actix_web::{
    App, HttpServer,
    web::{self, Data},
};
use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info};
use router_reboot::{
    api::Api,
    config::AppConfig,
    router_client::RouterSessionClient,
    services::{
        connectivity::{ConnectivityMonitor, HttpConnectivityProbe},
        estimate::DurationEstimator,
        notification::{CommandNotifier, LogNotifier, Notifier},
        reboot::{RebootOrchestrator, RebootTiming},
        run_log::RunLog,
    },
};
use std::{io::Write, sync::Arc};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

type Orchestrator = RebootOrchestrator<RouterSessionClient, HttpConnectivityProbe>;
type RebootApi = Api<RouterSessionClient, HttpConnectivityProbe>;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize();

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let orchestrator = create_orchestrator().context("failed to create reboot orchestrator")?;

    let monitor_cancel = CancellationToken::new();
    let monitor = spawn_connectivity_monitor(&orchestrator, monitor_cancel.clone())
        .context("failed to start connectivity monitor")?;

    let (server_handle, server_task) = run_server(orchestrator.clone())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => debug!("ctrl-c received"),
        _ = sigterm.recv() => debug!("SIGTERM received"),
        result = server_task => {
            match result {
                Ok(Ok(())) => debug!("server stopped normally"),
                Ok(Err(e)) => error!("server stopped with error: {e}"),
                Err(e) => error!("server task panicked: {e}"),
            }
        }
    }

    info!("shutting down");

    server_handle.stop(true).await;
    orchestrator.shutdown().await;
    monitor_cancel.cancel();
    if let Err(e) = monitor.await {
        error!("connectivity monitor failed: {e}");
    }

    info!("shutdown complete");

    Ok(())
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));
}

fn create_orchestrator() -> Result<Orchestrator> {
    let config = AppConfig::get();

    let router = RouterSessionClient::new().context("failed to create router client")?;
    let wan = HttpConnectivityProbe::new(
        &config.connectivity.url,
        HttpConnectivityProbe::DEFAULT_TIMEOUT,
    )
    .context("failed to create WAN probe")?;

    let notifier: Arc<dyn Notifier + Send + Sync> = match &config.notify_command {
        Some(program) => {
            info!("notifications via {program:?}");
            Arc::new(CommandNotifier::new(program))
        }
        None => Arc::new(LogNotifier),
    };

    let estimator = DurationEstimator::load(&config.paths.estimate_file);
    info!(
        "reboot estimate {:.1}s from {:?}",
        estimator.seconds(),
        config.paths.estimate_file
    );

    Ok(RebootOrchestrator::new(
        router,
        wan,
        config.router.clone(),
        estimator,
        notifier,
        RunLog::new(&config.paths.run_log_file),
        RebootTiming::default(),
    ))
}

fn spawn_connectivity_monitor(
    orchestrator: &Orchestrator,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let config = &AppConfig::get().connectivity;
    let probe = HttpConnectivityProbe::new(&config.url, HttpConnectivityProbe::DEFAULT_TIMEOUT)?;
    let orchestrator = orchestrator.clone();

    Ok(ConnectivityMonitor::new(probe, config.interval)
        .spawn(cancel, move |status| orchestrator.set_internet_status(status)))
}

fn run_server(
    orchestrator: Orchestrator,
) -> Result<(
    ServerHandle,
    tokio::task::JoinHandle<Result<(), std::io::Error>>,
)> {
    let api = RebootApi::new(orchestrator);
    let port = AppConfig::get().api.port;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(api.clone()))
            .route("/status", web::get().to(RebootApi::status))
            .route("/diagnostics", web::get().to(RebootApi::diagnostics))
            .route("/reboot", web::post().to(RebootApi::reboot))
            .route("/cancel", web::post().to(RebootApi::cancel))
            .route("/healthcheck", web::get().to(RebootApi::healthcheck))
    })
    .bind(("127.0.0.1", port))
    .context("failed to bind server")?
    .disable_signals()
    .run();

    info!("listening on 127.0.0.1:{port}");

    Ok((server.handle(), tokio::spawn(server)))
}
