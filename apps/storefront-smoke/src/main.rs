mod config;
mod logging;

use config::SmokeConfig;
use storefront_core::EngineEvent;
use storefront_net::EventStream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };
    info!(
        server = %config.runtime.server_address,
        user = config.runtime.engine.username.as_deref().unwrap_or("<anonymous>"),
        "starting storefront-smoke"
    );

    let handle = match storefront_net::connect(config.runtime.clone()).await {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "connection failed");
            eprintln!("Failed to connect: {err}");
            std::process::exit(1);
        }
    };
    let mut events = handle.subscribe();

    let run_for = async {
        match config.run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = log_events(&mut events) => info!("runtime stopped"),
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = run_for => info!("smoke duration elapsed"),
    }
    handle.shutdown();
}

/// Log every engine event until the runtime disconnects.
async fn log_events(events: &mut EventStream) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::Snapshot(snapshot)) => debug!(
                cart_rows = snapshot.cart.rows.len(),
                cart_total = snapshot.cart.total,
                checkout_in_flight = snapshot.checkout.in_flight,
                chat_messages = snapshot.chat.messages.len(),
                online = snapshot.chat.online_peers.len(),
                page = snapshot.catalog.page,
                search = snapshot.catalog.query.as_deref().unwrap_or_default(),
                total_pages = snapshot.catalog.total_pages,
                "snapshot"
            ),
            Ok(EngineEvent::Alert(alert)) => {
                info!(tag = %alert.tag, level = ?alert.level, title = %alert.title, message = %alert.message, "alert")
            }
            Ok(EngineEvent::Connection(state)) => {
                info!(?state, "connection state changed");
                if state == storefront_core::ConnectionState::Disconnected {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
            Err(RecvError::Closed) => return,
        }
    }
}
