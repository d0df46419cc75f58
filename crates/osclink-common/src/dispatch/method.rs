//! Registered methods
//!
//! A method pairs an optional path and an optional type string with a
//! handler. `None` in either position matches anything.

use std::fmt;

use crate::protocol::{Argument, Message};

/// Outcome reported by a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    /// Stop offering the message to later methods
    Handled,
    /// Keep looking for other matching methods
    NotHandled,
}

/// Receives the messages a method matched.
///
/// `path` is the method's own path, or the message path for methods
/// registered without one. `types` and `args` are already coerced to the
/// method's type string when coercion was needed.
pub trait MethodHandler: Send {
    fn handle(&mut self, path: &str, types: &str, args: &[Argument], msg: &Message) -> HandlerResult;
}

impl<F> MethodHandler for F
where
    F: FnMut(&str, &str, &[Argument], &Message) -> HandlerResult + Send,
{
    fn handle(&mut self, path: &str, types: &str, args: &[Argument], msg: &Message) -> HandlerResult {
        self(path, types, args, msg)
    }
}

/// Identifies one registration on a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub(crate) u64);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method-{}", self.0)
    }
}

pub(crate) struct Method {
    pub(crate) id: MethodId,
    pub(crate) path: Option<String>,
    pub(crate) typespec: Option<String>,
    pub(crate) handler: Box<dyn MethodHandler>,
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("typespec", &self.typespec)
            .finish_non_exhaustive()
    }
}
