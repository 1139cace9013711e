use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use log::{error, info};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use cdr_decoder_daemon::config::{parse_args, parse_config};
use cdr_decoder_daemon::error::DaemonError;
use cdr_decoder_daemon::server::{ServerState, decode_cdr};

type AppRouter = Router<Arc<ServerState>>;

fn get_router() -> AppRouter {
    Router::new().route("/", get(decode_cdr))
}

async fn server_shutdown_signal(server_shutdown_rx: oneshot::Receiver<()>) {
    // a dropped sender also means shut down
    let _ = server_shutdown_rx.await;
    info!("Server received shutdown signal, exiting...");
}

// Fires the server's shutdown once the user hits ctrl+c
fn run_shutdown_thread(server_shutdown_tx: oneshot::Sender<()>) {
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {err}");
        }
        let _ = server_shutdown_tx.send(());
    });
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), DaemonError> {
    env_logger::init();

    let args = parse_args();
    let config = parse_config(&args.config_path).await?;

    let address = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| DaemonError::BindError {
            address: address.clone(),
            source,
        })?;
    info!(
        "decoding {} with {} on request at http://{address}/",
        config.cdr_path, config.schema_path
    );

    let (server_shutdown_tx, server_shutdown_rx) = oneshot::channel();
    run_shutdown_thread(server_shutdown_tx);

    let state = Arc::new(ServerState { config });
    let app = get_router().with_state(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(server_shutdown_signal(server_shutdown_rx))
        .await?;
    Ok(())
}
