//! Session identity and the connection lifecycle.

use thiserror::Error;

mod manager;
pub mod warmup;

pub use manager::{
    ConnectionManager, ConnectionSettings, DropReason, SessionError, SessionEvent,
};

/// One attachment to a remote demo environment: which project, and the
/// terminal geometry it was mounted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub slug: String,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("project slug cannot be empty")]
    Empty,
    #[error("invalid character {0:?} in project slug")]
    InvalidChar(char),
}

impl Session {
    /// Validates the slug the same way the service does before it ever
    /// reaches the wire: trimmed, lowercased, ASCII alphanumeric plus
    /// `-` and `_` only.
    pub fn new(slug: &str, cols: u16, rows: u16) -> Result<Self, SlugError> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(SlugError::Empty);
        }
        if let Some(bad) = slug
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(SlugError::InvalidChar(bad));
        }
        Ok(Self {
            slug: slug.to_ascii_lowercase(),
            cols,
            rows,
        })
    }
}

/// Lifecycle of the one transport connection a session owns. Exactly one
/// state is active at a time; the `ConnectionManager` worker is its sole
/// owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Retrying,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_slug_shapes() {
        for slug in ["minirt", "ft_irc", "push-swap", "cub3d"] {
            assert!(Session::new(slug, 80, 24).is_ok(), "rejected {slug}");
        }
    }

    #[test]
    fn lowercases_and_trims() {
        let session = Session::new("  MiniRT ", 80, 24).unwrap();
        assert_eq!(session.slug, "minirt");
    }

    #[test]
    fn rejects_empty_slug() {
        assert_eq!(Session::new("   ", 80, 24), Err(SlugError::Empty));
    }

    #[test]
    fn rejects_traversal_and_separators() {
        assert_eq!(
            Session::new("../etc", 80, 24),
            Err(SlugError::InvalidChar('.'))
        );
        assert_eq!(
            Session::new("a/b", 80, 24),
            Err(SlugError::InvalidChar('/'))
        );
        assert_eq!(
            Session::new("a b", 80, 24),
            Err(SlugError::InvalidChar(' '))
        );
    }
}
