//! Interactive client: the local terminal view, resize debouncing, and
//! the controller that wires them to a session.

mod controller;
mod resize;
mod view;

pub use controller::{ClientError, SessionController};
pub use resize::ResizeCoordinator;
pub use view::{Surface, TerminalView, ViewEvent};
