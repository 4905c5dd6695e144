use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use url::Url;

use crate::protocol::{self, ClientFrame};
use crate::session::{ConnectionState, Session};
use crate::transport::{Connection, Connector, TransportEvent};

/// Retry policy for one session. The delay is deliberately constant and
/// the cap small: the remote is a low-traffic demo service that either
/// wakes up within a couple of attempts or is down.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub max_retries: u32,
    pub connect_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            connect_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Why a connection attempt or an open connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    ConnectTimeout,
    Transport(String),
    ConnectionLost,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::ConnectTimeout => write!(f, "connect timed out"),
            DropReason::Transport(msg) => write!(f, "transport error: {msg}"),
            DropReason::ConnectionLost => write!(f, "connection lost"),
        }
    }
}

/// Typed event feed from the connection worker. The state machine is the
/// single source of truth for transitions; consumers only react.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Opened {
        attempt: u32,
    },
    Message(protocol::Inbound),
    Retrying {
        attempt: u32,
        delay: Duration,
        reason: DropReason,
    },
    Failed {
        attempts: u32,
        reason: DropReason,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Wire(#[from] protocol::WireError),
    #[error("connection manager is gone")]
    Terminated,
}

#[derive(Debug)]
enum Command {
    Connect,
    Retry,
    Send(String),
    Close,
}

/// Owns the lifecycle of one transport connection per session: connect
/// with a timeout, bounded retry with a fixed delay, reconnect on drop,
/// clean teardown. All timers live inside the worker task and die with
/// it, so nothing can fire after `close()`.
///
/// The attempt counter is reset only by [`ConnectionManager::retry`]
/// (the user-facing retry action), never by a successful open. A session
/// that burned attempts on a cold start keeps that history until the
/// user explicitly starts over.
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    worker: JoinHandle<()>,
}

impl ConnectionManager {
    pub fn spawn(
        session: Session,
        url: Url,
        connector: Arc<dyn Connector>,
        settings: ConnectionSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let worker = tokio::spawn(
            Worker {
                session,
                url,
                connector,
                settings,
                cmd_rx,
                event_tx,
                state_tx,
                attempt: 0,
            }
            .run(),
        );
        (
            Self {
                cmd_tx,
                state_rx,
                worker,
            },
            event_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Begin connecting. Does not reset the attempt counter.
    pub fn connect(&self) {
        let _ = self.cmd_tx.send(Command::Connect);
    }

    /// User-initiated retry: resets the attempt counter to zero and
    /// immediately starts connecting again.
    pub fn retry(&self) {
        let _ = self.cmd_tx.send(Command::Retry);
    }

    /// Queue one client frame. Fails fast when the connection is not
    /// open; callers decide whether that is worth surfacing.
    pub fn send(&self, frame: &ClientFrame) -> Result<(), SessionError> {
        if self.state() != ConnectionState::Open {
            return Err(SessionError::NotConnected);
        }
        let text = protocol::encode(frame)?;
        self.cmd_tx
            .send(Command::Send(text))
            .map_err(|_| SessionError::Terminated)
    }

    /// Tear down: cancels any pending connect/retry timer, closes the
    /// transport, and waits for the worker to finish. A connect attempt
    /// in flight is dropped at its await point and can never report.
    pub async fn close(self) {
        let _ = self.cmd_tx.send(Command::Close);
        let _ = self.worker.await;
    }
}

enum DialOutcome {
    Connected(Box<dyn Connection>),
    Dropped(DropReason),
    Closing,
}

enum PumpEnd {
    Dropped(DropReason),
    Closing,
}

enum RetryDecision {
    Continue,
    GiveUp,
    Closing,
}

enum CycleEnd {
    Failed,
    Closing,
}

struct Worker {
    session: Session,
    url: Url,
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    attempt: u32,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let Some(cmd) = self.cmd_rx.recv().await else {
                break;
            };
            match cmd {
                Command::Connect => {
                    if matches!(self.cycle().await, CycleEnd::Closing) {
                        break;
                    }
                }
                Command::Retry => {
                    self.attempt = 0;
                    if matches!(self.cycle().await, CycleEnd::Closing) {
                        break;
                    }
                }
                Command::Send(_) => debug!("dropping frame; not connected"),
                Command::Close => break,
            }
        }
        self.set_state(ConnectionState::Idle);
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// One connect-retry cycle. Returns when the session is open and
    /// subsequently torn down, the retry budget is exhausted, or close
    /// is requested.
    async fn cycle(&mut self) -> CycleEnd {
        loop {
            self.attempt += 1;
            self.set_state(ConnectionState::Connecting);
            debug!(
                slug = %self.session.slug,
                attempt = self.attempt,
                "dialing terminal service"
            );
            let reason = match self.dial().await {
                DialOutcome::Closing => return CycleEnd::Closing,
                DialOutcome::Dropped(reason) => reason,
                DialOutcome::Connected(conn) => {
                    self.set_state(ConnectionState::Open);
                    info!(
                        slug = %self.session.slug,
                        attempt = self.attempt,
                        "terminal channel open"
                    );
                    self.emit(SessionEvent::Opened {
                        attempt: self.attempt,
                    });
                    match self.pump(conn).await {
                        PumpEnd::Closing => return CycleEnd::Closing,
                        PumpEnd::Dropped(reason) => reason,
                    }
                }
            };
            match self.schedule_retry(reason).await {
                RetryDecision::Continue => {}
                RetryDecision::GiveUp => return CycleEnd::Failed,
                RetryDecision::Closing => return CycleEnd::Closing,
            }
        }
    }

    async fn dial(&mut self) -> DialOutcome {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let mut attempt = pin!(timeout(self.settings.connect_timeout, async move {
            connector.connect(&url).await
        }));
        loop {
            tokio::select! {
                result = &mut attempt => {
                    return match result {
                        Ok(Ok(conn)) => DialOutcome::Connected(conn),
                        Ok(Err(err)) => DialOutcome::Dropped(DropReason::Transport(err.to_string())),
                        Err(_) => DialOutcome::Dropped(DropReason::ConnectTimeout),
                    };
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Close) | None => return DialOutcome::Closing,
                    Some(Command::Send(_)) => debug!("dropping frame; still connecting"),
                    Some(Command::Connect | Command::Retry) => {}
                }
            }
        }
    }

    /// Shuttle frames while the connection is open.
    async fn pump(&mut self, mut conn: Box<dyn Connection>) -> PumpEnd {
        enum Step {
            Inbound(Option<TransportEvent>),
            Cmd(Option<Command>),
        }
        loop {
            let step = tokio::select! {
                event = conn.recv() => Step::Inbound(event),
                cmd = self.cmd_rx.recv() => Step::Cmd(cmd),
            };
            match step {
                Step::Inbound(Some(TransportEvent::Frame(text))) => {
                    self.emit(SessionEvent::Message(protocol::decode(&text)));
                }
                Step::Inbound(Some(TransportEvent::Closed { reason })) => {
                    warn!(slug = %self.session.slug, ?reason, "connection closed unexpectedly");
                    return PumpEnd::Dropped(DropReason::ConnectionLost);
                }
                Step::Inbound(None) => {
                    warn!(slug = %self.session.slug, "transport went away");
                    return PumpEnd::Dropped(DropReason::ConnectionLost);
                }
                Step::Cmd(Some(Command::Send(text))) => {
                    if let Err(err) = conn.send(text).await {
                        warn!(slug = %self.session.slug, %err, "send failed; treating connection as lost");
                        return PumpEnd::Dropped(DropReason::Transport(err.to_string()));
                    }
                }
                Step::Cmd(Some(Command::Close)) | Step::Cmd(None) => return PumpEnd::Closing,
                Step::Cmd(Some(Command::Connect | Command::Retry)) => {}
            }
        }
    }

    async fn schedule_retry(&mut self, reason: DropReason) -> RetryDecision {
        if self.attempt >= self.settings.max_retries {
            warn!(
                slug = %self.session.slug,
                attempts = self.attempt,
                %reason,
                "retry budget exhausted"
            );
            self.set_state(ConnectionState::Failed);
            self.emit(SessionEvent::Failed {
                attempts: self.attempt,
                reason,
            });
            return RetryDecision::GiveUp;
        }
        self.set_state(ConnectionState::Retrying);
        warn!(
            slug = %self.session.slug,
            attempt = self.attempt,
            delay_ms = self.settings.retry_delay.as_millis() as u64,
            %reason,
            "scheduling reconnect"
        );
        self.emit(SessionEvent::Retrying {
            attempt: self.attempt,
            delay: self.settings.retry_delay,
            reason,
        });
        let mut delay = pin!(sleep(self.settings.retry_delay));
        loop {
            tokio::select! {
                _ = &mut delay => return RetryDecision::Continue,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Close) | None => return RetryDecision::Closing,
                    Some(Command::Retry) => {
                        self.attempt = 0;
                        return RetryDecision::Continue;
                    }
                    Some(Command::Connect) => {}
                    Some(Command::Send(_)) => debug!("dropping frame; waiting to reconnect"),
                }
            }
        }
    }
}
