use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{DispatchError, HandlerError};
use crate::message::Message;

/// What the loop does after a handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to send.
    Done,
    /// Send `body` back on the request's tag, correlated by request id.
    Reply(Bytes),
    /// Stop the dispatch loop after this message.
    Shutdown,
}

/// Handles one message tag.
pub trait Handler: Send + Sync {
    fn handle(&self, message: &Message) -> Result<Outcome, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Message) -> Result<Outcome, HandlerError> + Send + Sync,
{
    fn handle(&self, message: &Message) -> Result<Outcome, HandlerError> {
        self(message)
    }
}

/// Pins a closure's signature so argument and error types are inferred.
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&Message) -> Result<Outcome, HandlerError> + Send + Sync,
{
    f
}

/// Immutable mapping from message tag to handler.
///
/// Built once through [`DispatchTable::builder`]; there is no way to mutate
/// it after construction, so the loop and its workers share it freely.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<u16, Arc<dyn Handler>>,
}

impl DispatchTable {
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    pub fn contains(&self, tag: u16) -> bool {
        self.handlers.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered tags, ascending.
    pub fn tags(&self) -> Vec<u16> {
        let mut tags: Vec<u16> = self.handlers.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Invoke the handler registered for `message.tag`.
    ///
    /// A panicking handler is caught here and reported as
    /// `DispatchError::Panicked`.
    pub fn dispatch(&self, message: &Message) -> Result<Outcome, DispatchError> {
        let tag = message.tag;
        let handler = self
            .handlers
            .get(&tag)
            .ok_or(DispatchError::UnknownMessage(tag))?;

        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(source)) => Err(DispatchError::Handler { tag, source }),
            Err(payload) => Err(DispatchError::Panicked {
                tag,
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("tags", &self.tags())
            .finish()
    }
}

#[derive(Default)]
pub struct DispatchTableBuilder {
    handlers: HashMap<u16, Arc<dyn Handler>>,
}

impl DispatchTableBuilder {
    /// Register `handler` for `tag`, replacing any earlier registration.
    ///
    /// Registering a reserved tag such as `PING` overrides the built-in behavior.
    pub fn on<H>(mut self, tag: u16, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.handlers.insert(tag, Arc::new(handler));
        self
    }

    pub fn build(self) -> DispatchTable {
        DispatchTable {
            handlers: self.handlers,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
