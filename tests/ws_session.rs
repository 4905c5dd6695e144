//! End-to-end session tests against a real WebSocket server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        Path, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, oneshot};
use url::Url;

use demoterm::protocol::{ClientFrame, Inbound};
use demoterm::session::{ConnectionManager, ConnectionSettings, Session, SessionEvent};
use demoterm::transport::WebSocketConnector;

#[derive(Clone, Default)]
struct AppState {
    /// Everything each connection received, tagged by slug.
    received: Arc<Mutex<Vec<(String, String)>>>,
    /// Outbound handle per live connection, so tests can inject frames
    /// or hang up.
    conns: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<WsMessage>>>>,
}

impl AppState {
    async fn push(&self, slug: &str, text: &str) {
        let conns = self.conns.lock().await;
        let tx = conns.get(slug).expect("no live connection for slug");
        tx.send(WsMessage::Text(text.to_string())).expect("push frame");
    }

    async fn hang_up(&self, slug: &str) {
        let conns = self.conns.lock().await;
        let tx = conns.get(slug).expect("no live connection for slug");
        tx.send(WsMessage::Close(None)).expect("send close");
    }

    async fn received_for(&self, slug: &str) -> Vec<String> {
        self.received
            .lock()
            .await
            .iter()
            .filter(|(s, _)| s == slug)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, slug))
}

async fn handle_socket(socket: WebSocket, state: AppState, slug: String) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    state.conns.lock().await.insert(slug.clone(), tx);

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, WsMessage::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(WsMessage::Text(text)) => {
                state.received.lock().await.push((slug.clone(), text));
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    send_task.abort();
    let _ = send_task.await;
}

async fn spawn_server() -> (AppState, SocketAddr, oneshot::Sender<()>) {
    let state = AppState::default();
    let router = Router::new()
        .route("/ws/terminal/:slug/", get(ws_handler))
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });
    (state, addr, shutdown_tx)
}

fn settings() -> ConnectionSettings {
    ConnectionSettings {
        max_retries: 3,
        connect_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_millis(100),
    }
}

fn attach(
    addr: SocketAddr,
    slug: &str,
) -> (
    ConnectionManager,
    mpsc::UnboundedReceiver<SessionEvent>,
) {
    let session = Session::new(slug, 80, 24).expect("valid slug");
    let url = Url::parse(&format!("ws://{addr}/ws/terminal/{slug}/")).expect("valid url");
    ConnectionManager::spawn(session, url, Arc::new(WebSocketConnector), settings())
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

#[tokio::test]
async fn streams_frames_both_ways_in_order() {
    let (state, addr, _shutdown) = spawn_server().await;
    let (manager, mut events) = attach(addr, "minirt");
    manager.connect();

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Opened { attempt: 1 }
    ));

    state.push("minirt", r#"{"download_progress":{"percent":40}}"#).await;
    state.push("minirt", r#"{"output":"$ ls\r\nscene.rt\r\n"}"#).await;
    state.push("minirt", "not json at all").await;

    match next_event(&mut events).await {
        SessionEvent::Message(Inbound::Frame(frame)) => {
            assert_eq!(frame.download_progress.map(|p| p.percent), Some(40));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match next_event(&mut events).await {
        SessionEvent::Message(Inbound::Frame(frame)) => {
            assert_eq!(frame.output.as_deref(), Some("$ ls\r\nscene.rt\r\n"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Message(Inbound::Raw("not json at all".into()))
    );

    manager.send(&ClientFrame::resize(100, 30)).expect("send resize");
    manager.send(&ClientFrame::input("ls\n")).expect("send input");

    // Give the frames time to cross the loopback.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        state.received_for("minirt").await,
        vec![
            r#"{"resize":{"cols":100,"rows":30}}"#.to_string(),
            r#"{"input":"ls\n"}"#.to_string(),
        ]
    );

    manager.close().await;
}

#[tokio::test]
async fn reconnects_after_server_hangup_without_resetting_attempts() {
    let (state, addr, _shutdown) = spawn_server().await;
    let (manager, mut events) = attach(addr, "ft_irc");
    manager.connect();

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Opened { attempt: 1 }
    ));

    state.hang_up("ft_irc").await;

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Retrying { attempt: 1, .. }
    ));
    // The redial lands on the same server; the attempt counter keeps
    // counting from where the drop left it.
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Opened { attempt: 2 }
    ));

    manager.send(&ClientFrame::input("whoami\n")).expect("send after reconnect");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        state.received_for("ft_irc").await,
        vec![r#"{"input":"whoami\n"}"#.to_string()]
    );

    manager.close().await;
}

#[tokio::test]
async fn unreachable_service_fails_after_three_attempts() {
    // Bind then drop a listener to get a port that refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let (manager, mut events) = attach(addr, "cub3d");
    manager.connect();

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Retrying { attempt: 1, .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Retrying { attempt: 2, .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Failed { attempts: 3, .. }
    ));

    manager.close().await;
}

#[tokio::test]
async fn sessions_do_not_cross_deliver() {
    let (state, addr, _shutdown) = spawn_server().await;
    let (alpha, mut alpha_events) = attach(addr, "alpha");
    let (beta, mut beta_events) = attach(addr, "beta");
    alpha.connect();
    beta.connect();
    assert!(matches!(
        next_event(&mut alpha_events).await,
        SessionEvent::Opened { .. }
    ));
    assert!(matches!(
        next_event(&mut beta_events).await,
        SessionEvent::Opened { .. }
    ));

    state.push("alpha", r#"{"output":"only for alpha"}"#).await;
    assert!(matches!(
        next_event(&mut alpha_events).await,
        SessionEvent::Message(Inbound::Frame(frame))
            if frame.output.as_deref() == Some("only for alpha")
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(beta_events.try_recv().is_err());

    alpha.close().await;
    beta.close().await;
}
