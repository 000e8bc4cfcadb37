//! mdsync server: shared Markdown editor relay.
//!
//! Serves the browser client from `web/` and relays edits and cursors over
//! `/ws`. Logging is controlled by `RUST_LOG` (default `info`).

use log::{error, info};
use mdsync_collab::{RelayServer, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    info!(
        "Serving client from {} (outbound queue {}, event queue {})",
        config.web_root.display(),
        config.outbound_capacity,
        config.event_capacity
    );

    let server = RelayServer::new(config);
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => {
                error!("Cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    if let Err(e) = server.run_until(shutdown).await {
        error!("{e}");
        std::process::exit(1);
    }
}
