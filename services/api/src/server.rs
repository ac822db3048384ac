use crate::cli::ServeArgs;
use crate::infra::AppState;
use crate::routes::with_vote_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use vote_receiver::broker::{spawn_delivery_listener, BrokerPublisher};
use vote_receiver::config::AppConfig;
use vote_receiver::error::AppError;
use vote_receiver::telemetry;
use vote_receiver::votes::ReceiveVoteService;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let (reporter, delivery_listener) = spawn_delivery_listener();
    let publisher = Arc::new(BrokerPublisher::connect(&config.kafka, reporter).await?);
    let vote_service = Arc::new(
        ReceiveVoteService::new(publisher.clone())
            .with_publish_budget(config.intake.publish_timeout),
    );

    let app = with_vote_routes(vote_service, config.intake.request_timeout)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        topic = publisher.topic(),
        pool_size = publisher.pool_size(),
        "vote receiver ready"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    readiness_flag.store(false, Ordering::Release);

    let closing = publisher.clone();
    match tokio::task::spawn_blocking(move || closing.close()).await {
        Ok(Ok(())) => info!("producer pool closed"),
        Ok(Err(err)) => warn!(error = %err, "producer pool closed with errors"),
        Err(err) => warn!(error = %err, "producer pool close task failed"),
    }
    drop(publisher);

    match tokio::time::timeout(config.kafka.close_timeout, delivery_listener).await {
        Ok(Ok(summary)) => info!(
            delivered = summary.delivered,
            failed = summary.failed,
            "delivery reporting finished"
        ),
        Ok(Err(err)) => warn!(error = %err, "delivery listener failed"),
        Err(_) => warn!("delivery listener still running at shutdown"),
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
