//! Composition root for one interactive session.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client::{ResizeCoordinator, Surface, TerminalView, ViewEvent};
use crate::config::{Config, ConfigError};
use crate::protocol::{ClientFrame, Inbound, ServerFrame};
use crate::session::{
    ConnectionManager, ConnectionState, Session, SessionError, SessionEvent, warmup,
};
use crate::transport::{Connector, WebSocketConnector};

use std::sync::Arc;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("terminal setup failed: {0}")]
    Terminal(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Drives one session end to end: dials, pumps frames between the
/// server and the local surface, debounces resizes, and tears
/// everything down in order (view first, then connection) so the
/// terminal is always restored before we wait on the network.
pub struct SessionController<V: Surface = TerminalView> {
    session: Session,
    manager: ConnectionManager,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    view: V,
    resize: ResizeCoordinator,
    warmup_url: Option<url::Url>,
}

enum Tick {
    Session(Option<SessionEvent>),
    View(Option<ViewEvent>),
    Debounce,
}

impl SessionController<TerminalView> {
    pub fn new(config: &Config, session: Session) -> Result<Self, ClientError> {
        Self::assemble(
            config,
            session,
            Arc::new(WebSocketConnector),
            TerminalView::new(),
        )
    }

    pub async fn run(mut self) -> Result<(), ClientError> {
        if let Some(url) = &self.warmup_url {
            warmup::ping(url).await;
        }

        let mut view_events = self.view.activate()?;
        self.view
            .notify(&format!("connecting to {} (Ctrl-] to detach)", self.session.slug));
        self.manager.connect();

        loop {
            let tick = tokio::select! {
                event = self.events.recv() => Tick::Session(event),
                event = view_events.recv() => Tick::View(event),
                _ = self.resize.elapsed() => Tick::Debounce,
            };
            match tick {
                Tick::Session(Some(event)) => {
                    if !self.on_session_event(event) {
                        break;
                    }
                }
                Tick::Session(None) => break,
                Tick::View(Some(event)) => {
                    if !self.on_view_event(event) {
                        break;
                    }
                }
                Tick::View(None) => break,
                Tick::Debounce => {
                    if let Some((cols, rows)) = self.resize.fire() {
                        self.push_resize(cols, rows);
                    }
                }
            }
        }

        // View before connection: restore the terminal immediately, then
        // wait for the network side to wind down.
        self.view.dispose();
        self.manager.close().await;
        info!(slug = %self.session.slug, "session finished");
        Ok(())
    }
}

impl<V: Surface> SessionController<V> {
    fn assemble(
        config: &Config,
        session: Session,
        connector: Arc<dyn Connector>,
        view: V,
    ) -> Result<Self, ClientError> {
        let url = config.terminal_url(&session)?;
        let warmup_url = if config.warmup {
            Some(config.service_url()?)
        } else {
            None
        };
        let (manager, events) =
            ConnectionManager::spawn(session.clone(), url, connector, config.connection);
        Ok(Self {
            session,
            manager,
            events,
            view,
            resize: ResizeCoordinator::new(config.resize_debounce),
            warmup_url,
        })
    }

    fn on_session_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Opened { attempt } => {
                debug!(attempt, "session open");
                // Geometry parked while the channel was down wins over
                // the mount geometry; either way the remote PTY catches
                // up as soon as the channel opens.
                let (cols, rows) = self
                    .resize
                    .take_pending()
                    .unwrap_or((self.session.cols, self.session.rows));
                self.push_resize(cols, rows);
            }
            SessionEvent::Message(Inbound::Frame(frame)) => self.render_frame(frame),
            SessionEvent::Message(Inbound::Raw(text)) => self.view.write_output(&text),
            SessionEvent::Retrying { attempt, delay, reason } => {
                self.view.notify(&format!(
                    "{reason}; reconnecting in {}s (attempt {attempt})",
                    delay.as_secs()
                ));
            }
            SessionEvent::Failed { attempts, reason } => {
                self.view.notify(&format!(
                    "{reason}; gave up after {attempts} attempts. Press r to retry, q to quit."
                ));
            }
        }
        true
    }

    fn render_frame(&mut self, frame: ServerFrame) {
        if let Some(output) = frame.output {
            self.view.write_output(&output);
        }
        if let Some(error) = frame.error {
            self.view.notify(&format!("server error: {error}"));
        }
        if let Some(progress) = frame.download_progress {
            self.view
                .notify(&format!("preparing files... {}%", progress.percent));
        }
    }

    fn on_view_event(&mut self, event: ViewEvent) -> bool {
        match event {
            ViewEvent::Detach => return false,
            ViewEvent::Resize { cols, rows } => self.resize.observe(cols, rows),
            ViewEvent::Input(bytes) => {
                if self.manager.state() == ConnectionState::Failed {
                    match bytes.as_slice() {
                        b"r" | b"R" => {
                            self.view.notify("retrying...");
                            self.manager.retry();
                        }
                        b"q" | b"Q" | [0x03] => return false,
                        _ => {}
                    }
                    return true;
                }
                let text = String::from_utf8_lossy(&bytes).into_owned();
                self.push_frame(&ClientFrame::input(text));
            }
        }
        true
    }

    fn push_resize(&mut self, cols: u16, rows: u16) {
        match self.manager.send(&ClientFrame::resize(cols, rows)) {
            Ok(()) => {}
            Err(SessionError::NotConnected) => self.resize.retain(cols, rows),
            Err(err) => debug!(%err, "resize not delivered"),
        }
    }

    fn push_frame(&mut self, frame: &ClientFrame) {
        if let Err(err) = self.manager.send(frame) {
            // Keys pressed while the channel is down are dropped, not
            // queued; replaying stale input into a fresh shell is worse.
            debug!(%err, "input dropped");
        }
    }
}
