use std::{net::SocketAddr, sync::Arc};

use tokio::{signal, sync::watch};
use tracing::{error, info, warn};

use petshop_api as api;
use petshop_api::message_queue::{InMemoryMessageQueue, MessageQueue};
use petshop_api::services::{
    checkout::StripeCheckoutProvider,
    notifications::{ChannelWebhook, LogOnlyDelivery, NotificationWorker, WebhookDelivery},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    api::db::seed_order_statuses(&db_pool).await?;
    let db_arc = Arc::new(db_pool);

    // Notification queue and its background worker
    let queue = Arc::new(InMemoryMessageQueue::with_max_size(
        cfg.message_queue_capacity,
    ));
    let delivery: Arc<dyn WebhookDelivery> = match cfg.notification_webhook_url.as_deref() {
        Some(url) if !url.is_empty() => {
            info!("Status notifications delivered to webhook");
            Arc::new(ChannelWebhook::new(url, cfg.notification_timeout())?)
        }
        _ => {
            warn!("Notification webhook not configured; notifications are only logged");
            Arc::new(LogOnlyDelivery)
        }
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = NotificationWorker::new(
        queue.clone() as Arc<dyn MessageQueue>,
        delivery,
        cfg.notification_poll_interval(),
    )
    .spawn(shutdown_rx);

    // Hosted checkout provider
    if cfg.checkout_secret_key.is_none() {
        warn!("Checkout secret key not configured; card orders will report an authentication error");
    }
    let provider = Arc::new(StripeCheckoutProvider::new(
        cfg.checkout_api_base.clone(),
        cfg.checkout_secret_key.clone(),
        cfg.checkout_timeout(),
    )?);

    let app_state = api::AppState::new(db_arc, cfg.clone(), provider, queue);
    let app = api::build_router(app_state);

    // Bind and serve
    let host: std::net::IpAddr = cfg.host.parse()?;
    let addr = SocketAddr::from((host, cfg.port));
    info!("petshop-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let the worker drain its current delivery before exiting
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        error!("Notification worker terminated abnormally: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
