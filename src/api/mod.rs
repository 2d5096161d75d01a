//! Beacon HTTP API
//!
//! HTTP surface for streams and console control, built with Axum.
//!
//! # Endpoints
//!
//! ## Streams
//! - `GET /api/v1/servers/:server_id/logs/stream` - Plugin logs (SSE)
//! - `GET /api/v1/servers/:server_id/logs/ws` - Plugin logs (WebSocket)
//! - `GET /api/v1/servers/:server_id/console/stream` - Console (SSE)
//! - `GET /api/v1/servers/:server_id/console/ws` - Console (WebSocket)
//!
//! ## Console
//! - `POST /api/v1/servers/:server_id/console/connect` - Connect if not connected
//! - `POST /api/v1/servers/:server_id/console/command` - Send a command
//! - `DELETE /api/v1/servers/:server_id/console` - Disconnect
//! - `GET /api/v1/servers/:server_id/console/status` - Connection status
//!
//! ## Plugins
//! - `POST /api/v1/servers/:server_id/plugins/logs` - Publish a plugin log record
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    http::HeaderValue,
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ApiConfig;

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Stream routes
        .route("/servers/:server_id/logs/stream", get(routes::streams::logs_sse))
        .route("/servers/:server_id/logs/ws", get(routes::streams::logs_ws))
        .route("/servers/:server_id/console/stream", get(routes::streams::console_sse))
        .route("/servers/:server_id/console/ws", get(routes::streams::console_ws))
        // Console routes
        .route("/servers/:server_id/console/connect", post(routes::console::connect))
        .route("/servers/:server_id/console/command", post(routes::console::command))
        .route("/servers/:server_id/console/status", get(routes::console::status))
        .route("/servers/:server_id/console", delete(routes::console::disconnect))
        // Plugin routes
        .route("/servers/:server_id/plugins/logs", post(routes::plugins::publish_log));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let cors = cors_layer(&state.config);
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Start the API server, stopping on Ctrl+C or SIGTERM
pub async fn serve(state: AppState) -> Result<(), ApiError> {
    let addr = state.config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Beacon API listening on {}", addr);
    serve_with_shutdown(listener, state, shutdown_signal()).await
}

/// Serve on `listener` until `signal` completes
///
/// Open streams hold their HTTP connections, so the gateway is shut down as
/// soon as the signal fires to let graceful shutdown finish.
pub async fn serve_with_shutdown(
    listener: tokio::net::TcpListener,
    state: AppState,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ApiError> {
    let gateway = state.gateway.clone();
    let router = build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            signal.await;
            gateway.shutdown();
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Beacon API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameServerConfig;
    use crate::console::{ConsoleConfig, ConsoleRegistry, LineDialer};
    use crate::directory::ServerDirectory;
    use crate::events::{Broker, BrokerConfig, Event, LogLevel, PluginLogRecord};
    use crate::gateway::{Gateway, StreamConfig};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;
    use tower::util::ServiceExt;
    use uuid::Uuid;

    /// Line console that accepts the credential "secret" and echoes commands
    async fn spawn_fake_console() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let reply = if line == "AUTH secret" {
                            "OK".to_string()
                        } else if let Some(command) = line.strip_prefix("CMD ") {
                            format!("RES echo: {}", command)
                        } else {
                            "DENIED".to_string()
                        };
                        if write.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        port
    }

    /// A port with nothing listening on it
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn server(port: u16) -> GameServerConfig {
        GameServerConfig {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            address: "127.0.0.1".to_string(),
            port,
            credential: "secret".to_string(),
        }
    }

    fn create_test_app(servers: Vec<GameServerConfig>) -> (Router, AppState) {
        create_test_app_with(servers, StreamConfig::default())
    }

    fn create_test_app_with(
        servers: Vec<GameServerConfig>,
        stream: StreamConfig,
    ) -> (Router, AppState) {
        let broker = Broker::new(BrokerConfig::default());
        let consoles = ConsoleRegistry::new(
            broker.clone(),
            Arc::new(LineDialer::default()),
            ConsoleConfig {
                connect_timeout_ms: 2_000,
                command_timeout_ms: 2_000,
                max_reconnect_attempts: 0,
                ..Default::default()
            },
        );
        let gateway = Gateway::new(broker.clone(), stream);
        let state = AppState::new(
            broker,
            consoles,
            gateway,
            ServerDirectory::new(servers),
            ApiConfig::default(),
        );

        (build_router(state.clone()), state)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, json: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn next_chunk(body: &mut axum::body::BodyDataStream) -> String {
        let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .expect("no SSE frame")
            .expect("stream ended")
            .unwrap();
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _) = create_test_app(vec![]);
        let response = app.oneshot(get("/health/live")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready_until_shutdown() {
        let (app, state) = create_test_app(vec![]);

        let response = app.clone().oneshot(get("/health/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        state.gateway.shutdown();
        let response = app.oneshot(get("/health/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (app, _) = create_test_app(vec![server(1)]);

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["broker"]["subscriptions"], 0);
        assert_eq!(json["consoles"]["servers"], 1);
        assert_eq!(json["consoles"]["connected"], 0);
    }

    #[tokio::test]
    async fn test_stream_rejects_bad_scope() {
        let known = server(1);
        let id = known.id;
        let (app, state) = create_test_app(vec![known]);

        let response = app
            .clone()
            .oneshot(get("/api/v1/servers/not-a-uuid/logs/stream"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(get(&format!("/api/v1/servers/{}/logs/stream", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(get(&format!(
                "/api/v1/servers/{}/logs/stream?plugin_instance_id=abc",
                id
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "VALIDATION_ERROR");

        assert_eq!(state.broker.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_log_stream_over_sse() {
        let known = server(1);
        let id = known.id;
        let (app, state) = create_test_app(vec![known]);
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();

        let response = app
            .clone()
            .oneshot(get(&format!(
                "/api/v1/servers/{}/logs/stream?plugin_instance_id={}",
                id, p1
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        let connected = next_chunk(&mut body).await;
        assert!(connected.contains("\"type\":\"connected\""));
        assert_eq!(state.broker.subscription_count(), 1);

        for (instance, message) in [(p2, "from p2"), (p1, "from p1")] {
            let response = app
                .clone()
                .oneshot(post_json(
                    &format!("/api/v1/servers/{}/plugins/logs", id),
                    &format!(
                        r#"{{"plugin_instance_id": "{}", "plugin_id": "greeter", "message": "{}"}}"#,
                        instance, message
                    ),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }

        let log = next_chunk(&mut body).await;
        assert!(log.contains("\"type\":\"log\""));
        assert!(log.contains("from p1"));
        assert!(!log.contains("from p2"));

        drop(body);
        tokio::time::timeout(Duration::from_secs(2), async {
            while state.broker.subscription_count() != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscription not released");
    }

    #[tokio::test]
    async fn test_publish_plugin_log() {
        let known = server(1);
        let id = known.id;
        let (app, _) = create_test_app(vec![known]);

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/servers/{}/plugins/logs", id),
                &format!(
                    r#"{{"plugin_instance_id": "{}", "plugin_id": "p", "level": "error", "message": "boom", "fields": {{"attempt": 3}}}}"#,
                    Uuid::new_v4()
                ),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = json_body(response).await;
        assert_eq!(json["delivered"], 0);

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/servers/{}/plugins/logs", Uuid::new_v4()),
                &format!(
                    r#"{{"plugin_instance_id": "{}", "plugin_id": "p", "message": "m"}}"#,
                    Uuid::new_v4()
                ),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(post_json(
                &format!("/api/v1/servers/{}/plugins/logs", id),
                "not json",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_console_lifecycle() {
        let known = server(spawn_fake_console().await);
        let id = known.id;
        let (app, state) = create_test_app(vec![known]);

        let response = app
            .clone()
            .oneshot(get(&format!("/api/v1/servers/{}/console/status", id)))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["state"], "disconnected");

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/servers/{}/console/command", id),
                r#"{"command": "ListPlayers"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/servers/{}/console/connect", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["state"], "connected");
        assert_eq!(json["generation"], 1);
        assert_eq!(state.consoles.connected_count(), 1);

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/servers/{}/console/command", id),
                r#"{"command": "ListPlayers"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["response"], "echo: ListPlayers");

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/servers/{}/console/command", id),
                r#"{"command": "  "}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/servers/{}/console", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(get(&format!("/api/v1/servers/{}/console/status", id)))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["state"], "disconnected");
    }

    #[tokio::test]
    async fn test_console_connect_failure_is_bad_gateway() {
        let known = server(closed_port().await);
        let id = known.id;
        let (app, state) = create_test_app(vec![known]);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/servers/{}/console/connect", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(json_body(response).await["error"]["code"], "CONSOLE_UNAVAILABLE");

        let response = app
            .oneshot(get(&format!("/api/v1/servers/{}/console/stream", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(state.broker.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_console_stream_over_sse() {
        let known = server(spawn_fake_console().await);
        let id = known.id;
        let (app, state) = create_test_app(vec![known]);

        let response = app
            .clone()
            .oneshot(get(&format!("/api/v1/servers/{}/console/stream", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.consoles.connected_count(), 1);

        let mut body = response.into_body().into_data_stream();
        assert!(next_chunk(&mut body).await.contains("\"stream\":\"console\""));

        let snapshot = next_chunk(&mut body).await;
        assert!(snapshot.contains("\"type\":\"console_state\""));
        assert!(snapshot.contains("\"state\":\"connected\""));
        assert!(snapshot.contains("\"generation\":1"));

        state.consoles.disconnect(id).await;
        let frame = next_chunk(&mut body).await;
        assert!(frame.contains("\"type\":\"console_state\""));
        assert!(frame.contains("\"state\":\"disconnected\""));
    }

    #[tokio::test]
    async fn test_serve_with_shutdown_closes_streams() {
        let known = server(1);
        let id = known.id;
        let (_, state) = create_test_app(vec![known]);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_with_shutdown(listener, state.clone(), async {
            let _ = stop_rx.await;
        }));

        // Raw HTTP/1.1 request for an SSE stream
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                format!(
                    "GET /api/v1/servers/{}/logs/stream HTTP/1.1\r\nHost: test\r\n\r\n",
                    id
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while state.broker.subscription_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream not opened");

        let _ = stop_tx.send(());
        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(state.broker.subscription_count(), 0);
    }

    async fn next_ws<S>(ws: &mut S) -> Message
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("no WebSocket frame")
            .expect("socket ended")
            .unwrap()
    }

    #[tokio::test]
    async fn test_log_stream_over_websocket() {
        let known = server(1);
        let id = known.id;
        let (_, state) = create_test_app_with(
            vec![known],
            StreamConfig {
                keepalive_ms: 50,
                ..Default::default()
            },
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_with_shutdown(listener, state.clone(), async {
            let _ = stop_rx.await;
        }));

        let url = format!("ws://{}/api/v1/servers/{}/logs/ws", addr, id);
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        match next_ws(&mut ws).await {
            Message::Text(text) => {
                assert!(text.contains("\"type\":\"connected\""));
                assert!(text.contains("\"stream\":\"plugin_logs\""));
            }
            other => panic!("expected connected frame, got {:?}", other),
        }
        assert_eq!(state.broker.subscription_count(), 1);

        let record = PluginLogRecord::new(
            Uuid::new_v4(),
            "greeter",
            "Greeter",
            LogLevel::Info,
            "hello",
        );
        state.broker.publish(Event::plugin_log(Some(id), record));

        // Keepalive frames may interleave with the log
        loop {
            match next_ws(&mut ws).await {
                Message::Text(text) if text.contains("\"type\":\"log\"") => {
                    assert!(text.contains("hello"));
                    break;
                }
                Message::Text(text) => assert!(text.contains("\"type\":\"ping\"")),
                Message::Ping(_) => {}
                other => panic!("unexpected frame {:?}", other),
            }
        }

        // A keepalive text frame is followed by a transport ping
        loop {
            if let Message::Text(text) = next_ws(&mut ws).await {
                if text.contains("\"type\":\"ping\"") {
                    break;
                }
            }
        }
        assert!(matches!(next_ws(&mut ws).await, Message::Ping(_)));

        ws.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while state.broker.subscription_count() != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscription not released after close");

        let _ = stop_tx.send(());
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}
