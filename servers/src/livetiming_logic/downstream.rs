use crate::livetiming_logic::config::Config;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::StreamExt;
use lib_timing::{BroadcastHub, ConnectionManager};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

/// Shared handles for the downstream routes.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub manager: Arc<ConnectionManager>,
}

pub async fn run(config: Config, app_state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port.unwrap_or(4000)));
    log::info!("Downstream server listening on {}", addr);

    if let (Some(cert_path), Some(key_path)) = (&config.tls_cert_path, &config.tls_key_path) {
        if cert_path.exists() && key_path.exists() {
            let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .expect("Failed to load TLS configuration");

            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .unwrap();
            return;
        }
        log::warn!("TLS cert/key not found on disk; serving without TLS");
    }

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
        })
        .await
        .unwrap();
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_id = format!("ws-{}", NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed));

    // The first subscriber starts the upstream session; everyone after
    // that finds it already running.
    if state.manager.activate() {
        log::info!("First subscriber; upstream session activated");
    }

    let mut rx = state.hub.add_client(&client_id);
    log::info!("Client {} connected", client_id);

    loop {
        tokio::select! {
            incoming = socket.next() => {
                match incoming {
                    // Downstream is push-only; anything the client sends
                    // besides a close is ignored.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            snapshot = rx.recv() => {
                match snapshot {
                    Some(snapshot) => {
                        if socket
                            .send(Message::Text(snapshot.to_string().into()))
                            .await
                            .is_err()
                        {
                            break; // client disconnected
                        }
                    }
                    // The hub dropped us (backed up); end the session.
                    None => break,
                }
            }
        }
    }

    state.hub.remove_client(&client_id);
    log::info!("Client {} disconnected", client_id);
}
