use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use storefront_api as api;
use api::auth::{GoogleOAuthClient, IdentityProvider};
use api::gateway::{CashfreeClient, PaymentGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }

    // Init events
    let (event_sender, event_rx) = api::events::channel(cfg.event_channel_capacity);
    tokio::spawn(api::events::process_events(event_rx));

    // Outbound integrations are built once and injected
    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        CashfreeClient::from_app_config(&cfg).context("failed to build the payment gateway client")?,
    );
    let identity: Option<Arc<dyn IdentityProvider>> = match GoogleOAuthClient::from_app_config(&cfg)
        .context("invalid Google OAuth configuration")?
    {
        Some(client) => Some(Arc::new(client)),
        None => {
            warn!("Google OAuth credentials not configured; sign-in is disabled");
            None
        }
    };

    let cfg = Arc::new(cfg);
    let state = api::AppState::new(
        Arc::new(db_pool),
        cfg.clone(),
        gateway,
        identity,
        event_sender,
    );
    let app = api::app_router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid listen address")?;
    info!(environment = %cfg.environment, "storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("storefront-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
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
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
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
}
