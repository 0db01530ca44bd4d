use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use toolbridge::config::{load_config, AppConfig};
use toolbridge::observability::init_tracing;
use toolbridge::routing::dispatch_request;
use toolbridge::state::AppState;

fn main() {
    let config = load_config().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });

    init_tracing(&config.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(async move {
        run(config).await;
    });
}

async fn run(config: AppConfig) {
    let port = config.port;
    let state = Arc::new(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to bind to 0.0.0.0:{port}: {err}");
            std::process::exit(1);
        });

    tracing::info!("toolbridge listening on 0.0.0.0:{port}");

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                continue;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("failed to enable TCP_NODELAY for {remote_addr}: {err}");
        }

        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let request_state = Arc::clone(&state);
        let hyper_service = service_fn(move |request: Request<Incoming>| {
            dispatch_request(Arc::clone(&request_state), request.map(Body::new))
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, hyper_service).await {
                tracing::debug!("failed to serve connection from {remote_addr}: {err:#}");
            }
        });
    }
}
