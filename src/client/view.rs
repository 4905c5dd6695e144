//! Local terminal rendering and input capture.
//!
//! The view is a passthrough: server output bytes go straight to stdout
//! and the remote emulator owns the screen. Locally we only toggle raw
//! mode and run an input thread that translates key presses into the
//! byte sequences a PTY expects.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const INPUT_POLL: Duration = Duration::from_millis(250);

/// Where session output and client notices land. The interactive client
/// renders to the real terminal; tests record instead.
pub trait Surface {
    /// Write server output verbatim, escape sequences included.
    fn write_output(&mut self, text: &str);

    /// One status line from the client itself, kept visually distinct
    /// from session output.
    fn notify(&mut self, message: &str);
}

/// What the input thread saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// Encoded PTY bytes for one key press or paste.
    Input(Vec<u8>),
    /// The local terminal changed size (or regained focus, which we
    /// treat as a size refresh so a hidden-then-shown view catches up).
    Resize { cols: u16, rows: u16 },
    /// Ctrl-] : leave the session, keep the remote process running.
    Detach,
}

pub struct TerminalView {
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    active: bool,
    disposed: bool,
}

impl TerminalView {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            reader: None,
            active: false,
            disposed: false,
        }
    }

    /// Current terminal geometry, with a sane fallback when the size
    /// query fails (e.g. stdout is not a tty).
    pub fn size() -> (u16, u16) {
        terminal::size().unwrap_or((80, 24))
    }

    /// Enter raw mode and start the input thread. Call once.
    pub fn activate(&mut self) -> io::Result<mpsc::UnboundedReceiver<ViewEvent>> {
        terminal::enable_raw_mode()?;
        self.active = true;
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::clone(&self.stop);
        self.reader = Some(std::thread::spawn(move || read_input(tx, stop)));
        Ok(rx)
    }

    /// Restore the terminal. Safe to call more than once; later calls
    /// are no-ops, so shutdown paths can all dispose without
    /// coordinating.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.stop.store(true, Ordering::Relaxed);
        if self.active {
            if let Err(err) = terminal::disable_raw_mode() {
                warn!(%err, "failed to leave raw mode");
            }
            let mut stdout = io::stdout();
            let _ = stdout.write_all(b"\r\n");
            let _ = stdout.flush();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        debug!("terminal view disposed");
    }
}

impl Surface for TerminalView {
    /// The remote emulator already emits carriage returns and escape
    /// sequences suited to raw mode; forward them untouched.
    fn write_output(&mut self, text: &str) {
        let mut stdout = io::stdout();
        if stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()).is_err() {
            warn!("stdout write failed");
        }
    }

    fn notify(&mut self, message: &str) {
        self.write_output(&format!("\r\n\x1b[33m[demoterm] {message}\x1b[0m\r\n"));
    }
}

impl Default for TerminalView {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TerminalView {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn read_input(tx: mpsc::UnboundedSender<ViewEvent>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match event::poll(INPUT_POLL) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(err) => {
                warn!(%err, "input poll failed");
                break;
            }
        }
        let event = match event::read() {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "input read failed");
                break;
            }
        };
        let forwarded = match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => {
                if is_detach(&key) {
                    tx.send(ViewEvent::Detach).is_ok()
                } else if let Some(bytes) = encode_key_event(key) {
                    tx.send(ViewEvent::Input(bytes)).is_ok()
                } else {
                    true
                }
            }
            Event::Paste(data) => tx.send(ViewEvent::Input(data.into_bytes())).is_ok(),
            Event::Resize(cols, rows) => tx.send(ViewEvent::Resize { cols, rows }).is_ok(),
            Event::FocusGained => {
                let (cols, rows) = TerminalView::size();
                tx.send(ViewEvent::Resize { cols, rows }).is_ok()
            }
            _ => true,
        };
        if !forwarded {
            break;
        }
    }
}

fn is_detach(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(']')
}

fn encode_key_event(key: KeyEvent) -> Option<Vec<u8>> {
    match key.code {
        KeyCode::Char(c) => {
            let mut bytes = Vec::new();
            if key.modifiers.contains(KeyModifiers::ALT) {
                bytes.push(0x1b);
            }
            if key.modifiers.contains(KeyModifiers::CONTROL) {
                let lower = c.to_ascii_lowercase();
                if lower.is_ascii_lowercase() {
                    bytes.push((lower as u8 - b'a') + 1);
                } else {
                    return None;
                }
            } else {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            Some(bytes)
        }
        KeyCode::Enter => Some(vec![b'\n']),
        KeyCode::Tab => Some(vec![b'\t']),
        KeyCode::Backspace => Some(vec![0x7f]),
        KeyCode::Esc => Some(vec![0x1b]),
        KeyCode::Up => Some(b"\x1b[A".to_vec()),
        KeyCode::Down => Some(b"\x1b[B".to_vec()),
        KeyCode::Right => Some(b"\x1b[C".to_vec()),
        KeyCode::Left => Some(b"\x1b[D".to_vec()),
        KeyCode::Home => Some(b"\x1b[H".to_vec()),
        KeyCode::End => Some(b"\x1b[F".to_vec()),
        KeyCode::PageUp => Some(b"\x1b[5~".to_vec()),
        KeyCode::PageDown => Some(b"\x1b[6~".to_vec()),
        KeyCode::Delete => Some(b"\x1b[3~".to_vec()),
        KeyCode::Insert => Some(b"\x1b[2~".to_vec()),
        _ => None,
    }
}
