//! Message dispatch
//!
//! The [`Dispatcher`] turns validated frames into handler calls. It owns the
//! registered methods, the deferred queue and the dispatch flags, and knows
//! nothing about sockets: the server feeds it frames together with the
//! address they came from.
//!
//! ## Matching
//!
//! Methods are tried in registration order. A method matches when its path
//! is unset, equal to the message path, or matched by the message path when
//! that path is a pattern; and when its type string is unset, equal to the
//! message's, or reachable through coercion. A handler returning
//! [`HandlerResult::Handled`] ends the search unless the message path is a
//! pattern.

pub mod error_context;
pub mod method;
pub mod pattern;
pub mod queue;

use std::fmt;

use tracing::{debug, warn};

pub use method::{HandlerResult, MethodHandler, MethodId};
pub use pattern::{is_pattern, pattern_match};
pub use queue::{DispatchQueue, QueuedMessage, MAX_EVENT_DELAY};

use crate::error::{OscError, Result};
use crate::protocol::{
    can_coerce_spec, coerced, get_path, is_bundle, read_u32, validate_bundle, Argument, Message,
};
use crate::transport::Address;
use crate::types::{Protocol, Timetag, TypeTag};
use method::Method;

/// Receives `(code, message, path)` for every failure while serving
pub type ErrorHandler = Box<dyn Fn(i32, &str, Option<&str>) + Send>;

/// Called with the bundle timetag before the first element of a bundle
pub type BundleStartHandler = Box<dyn FnMut(Timetag) + Send>;

/// Called after the last element of a bundle
pub type BundleEndHandler = Box<dyn FnMut() + Send>;

/// Path of introspection replies
pub const REPLY_PATH: &str = "#reply";

pub struct Dispatcher {
    methods: Vec<Method>,
    queue: DispatchQueue,
    next_id: u64,
    coerce: bool,
    queue_enabled: bool,
    introspection: bool,
    bundle_start: Option<BundleStartHandler>,
    bundle_end: Option<BundleEndHandler>,
    error_handler: Option<ErrorHandler>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.methods)
            .field("queued", &self.queue.len())
            .field("coerce", &self.coerce)
            .field("queue_enabled", &self.queue_enabled)
            .field("introspection", &self.introspection)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Coercion and queueing on, introspection off
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
            queue: DispatchQueue::new(),
            next_id: 1,
            coerce: true,
            queue_enabled: true,
            introspection: false,
            bundle_start: None,
            bundle_end: None,
            error_handler: None,
        }
    }

    // === Registration ===

    /// Registers a handler for `path` and `typespec`; `None` matches any.
    ///
    /// Method paths must be literal: a path with pattern characters is
    /// refused.
    pub fn add_method<H>(&mut self, path: Option<&str>, typespec: Option<&str>, handler: H) -> Result<MethodId>
    where
        H: MethodHandler + 'static,
    {
        if let Some(p) = path {
            if is_pattern(p) {
                return Err(OscError::InvalidPath(format!(
                    "method path {:?} contains pattern characters",
                    p
                )));
            }
        }
        let id = MethodId(self.next_id);
        self.next_id += 1;
        self.methods.push(Method {
            id,
            path: path.map(str::to_string),
            typespec: typespec.map(str::to_string),
            handler: Box::new(handler),
        });
        debug!(%id, ?path, ?typespec, "Added method");
        Ok(id)
    }

    /// Removes every method registered with this path and type string.
    ///
    /// A pattern `path` removes the methods whose path it matches. Returns
    /// the number of methods removed.
    pub fn del_method(&mut self, path: Option<&str>, typespec: Option<&str>) -> usize {
        let pattern = path.map(is_pattern).unwrap_or(false);
        let before = self.methods.len();
        self.methods.retain(|m| {
            let path_hit = match (path, m.path.as_deref()) {
                (None, None) => true,
                (Some(p), Some(mp)) => p == mp || (pattern && pattern_match(p, mp)),
                _ => false,
            };
            !(path_hit && typespec == m.typespec.as_deref())
        });
        before - self.methods.len()
    }

    /// Removes one registration. Returns whether it existed.
    pub fn del_method_by_id(&mut self, id: MethodId) -> bool {
        let before = self.methods.len();
        self.methods.retain(|m| m.id != id);
        before != self.methods.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn add_bundle_handlers(&mut self, start: BundleStartHandler, end: BundleEndHandler) {
        self.bundle_start = Some(start);
        self.bundle_end = Some(end);
    }

    pub fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.error_handler = handler;
    }

    // === Flags ===

    pub fn enable_coercion(&mut self, enable: bool) {
        self.coerce = enable;
    }

    pub fn coercion_enabled(&self) -> bool {
        self.coerce
    }

    /// Turns deferred dispatch on or off. When turning it off with
    /// `dispatch_remaining`, everything still queued is dispatched now.
    pub fn enable_queue(&mut self, enable: bool, dispatch_remaining: bool) {
        self.queue_enabled = enable;
        if !enable && dispatch_remaining && !self.queue.is_empty() {
            // the queue is known to be non-empty, so this cannot fail
            let _ = self.dispatch_queued(true);
        }
    }

    pub fn queue_enabled(&self) -> bool {
        self.queue_enabled
    }

    pub fn enable_introspection(&mut self, enable: bool) {
        self.introspection = enable;
    }

    pub fn introspection_enabled(&self) -> bool {
        self.introspection
    }

    // === Queue ===

    pub fn events_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Seconds until the next queued message is due, in `[0, 100]`
    pub fn next_event_delay(&self) -> f64 {
        self.queue.next_event_delay(Timetag::now())
    }

    /// Dispatches the earliest queued messages, together with any that are
    /// simultaneous with them, or the whole queue when `all` is set.
    pub fn dispatch_queued(&mut self, all: bool) -> Result<()> {
        if self.queue.is_empty() {
            let err = OscError::Internal("attempted to dispatch with empty queue".into());
            return Err(self.fail(err, None));
        }
        for entry in self.queue.pop_batch(all) {
            self.dispatch_message(&entry.path, &entry.message);
        }
        Ok(())
    }

    // === Dispatch ===

    /// Validates a frame and dispatches or queues its messages.
    ///
    /// Failures are reported to the error handler and returned. Returns the
    /// number of bytes consumed.
    pub fn dispatch_data(&mut self, data: &[u8], source: Option<&Address>) -> Result<usize> {
        if is_bundle(data) {
            if let Err(e) = validate_bundle(data) {
                return Err(self.fail(e, None));
            }
            self.dispatch_bundle(data, source)?;
        } else {
            let (path, mut msg) = Message::decode(data).map_err(|e| self.fail(e, get_path(data)))?;
            msg.set_source(source.cloned());
            self.dispatch_message(&path, &msg);
        }
        Ok(data.len())
    }

    /// Walks a validated bundle. The bundle handlers bracket its elements,
    /// nested bundles included.
    fn dispatch_bundle(&mut self, data: &[u8], source: Option<&Address>) -> Result<()> {
        let mut tt = [0u8; 8];
        tt.copy_from_slice(&data[8..16]);
        let timetag = Timetag::from_bytes(tt);
        let now = Timetag::now();

        if let Some(start) = self.bundle_start.as_mut() {
            start(timetag);
        }

        let mut result = Ok(());
        let mut pos = 16;
        while pos + 4 <= data.len() {
            let len = read_u32(&data[pos..]) as usize;
            pos += 4;
            let elem = &data[pos..pos + len];
            pos += len;

            if is_bundle(elem) {
                if let Err(e) = self.dispatch_bundle(elem, source) {
                    result = Err(e);
                    break;
                }
                continue;
            }
            match Message::decode(elem) {
                Ok((path, mut msg)) => {
                    msg.set_timetag(timetag);
                    msg.set_source(source.cloned());
                    self.schedule(timetag, now, path, msg);
                }
                Err(e) => {
                    result = Err(self.fail(e, get_path(elem)));
                    break;
                }
            }
        }

        if let Some(end) = self.bundle_end.as_mut() {
            end();
        }
        result
    }

    fn schedule(&mut self, timetag: Timetag, now: Timetag, path: String, msg: Message) {
        if timetag.is_immediate() || timetag.diff(&now) <= 0.0 || !self.queue_enabled {
            self.dispatch_message(&path, &msg);
        } else {
            debug!(path = %path, %timetag, "Queued message");
            self.queue.push(timetag, path, msg);
        }
    }

    /// Offers one decoded message to the registered methods
    pub fn dispatch_message(&mut self, path: &str, msg: &Message) {
        let types = msg.types();
        let pattern = is_pattern(path);
        let coerce = self.coerce;
        let mut handled = false;

        for method in self.methods.iter_mut() {
            let path_hit = match method.path.as_deref() {
                None => true,
                Some(mp) => mp == path || (pattern && pattern_match(path, mp)),
            };
            if !path_hit {
                continue;
            }
            let handler_path = method.path.as_deref().unwrap_or(path);

            let result = match method.typespec.as_deref() {
                None => method.handler.handle(handler_path, &types, msg.args(), msg),
                Some(spec) if spec == types => method.handler.handle(handler_path, spec, msg.args(), msg),
                Some(spec) if coerce && can_coerce_spec(spec, &types) => match coerce_args(spec, msg.args()) {
                    Some(args) => method.handler.handle(handler_path, spec, &args, msg),
                    None => continue,
                },
                Some(_) => continue,
            };

            if result == HandlerResult::Handled {
                handled = true;
                if !pattern {
                    break;
                }
            }
        }

        if !handled && self.introspection && path.ends_with('/') {
            self.introspect(path, &types, msg);
        }
    }

    /// Answers `/some/path/` with the child segments registered below it
    fn introspect(&self, path: &str, types: &str, msg: &Message) {
        let Some(source) = msg.source() else {
            return;
        };
        // unbound local peers cannot be answered
        if source.protocol() == Protocol::Unix && source.port().is_empty() {
            return;
        }

        let mut reply = Message::new();
        if types == "i" {
            if let Some(v) = msg.args().first().and_then(Argument::as_i32) {
                reply.add_int32(v);
            }
        }
        reply.add_string(path);

        let mut children: Vec<&str> = Vec::new();
        for m in &self.methods {
            let Some(rest) = m.path.as_deref().and_then(|mp| mp.strip_prefix(path)) else {
                continue;
            };
            let segment = rest.split('/').next().unwrap_or(rest);
            if !segment.is_empty() && !children.contains(&segment) {
                children.push(segment);
            }
        }
        for child in children {
            reply.add_string(child);
        }

        let mut dest = source.clone();
        if let Err(e) = dest.try_send_message(REPLY_PATH, &reply) {
            self.report(&e, Some(path));
        }
    }

    // === Errors ===

    /// Reports an error to the handler, or logs it when none is installed
    pub fn report(&self, err: &OscError, path: Option<&str>) {
        match &self.error_handler {
            Some(handler) => handler(err.code(), &err.to_string(), path),
            None => warn!(code = err.code(), path = path.unwrap_or(""), "{}", err),
        }
    }

    fn fail(&self, err: OscError, path: Option<&str>) -> OscError {
        self.report(&err, path);
        err
    }
}

fn coerce_args(spec: &str, args: &[Argument]) -> Option<Vec<Argument>> {
    spec.chars()
        .zip(args)
        .map(|(c, arg)| TypeTag::from_char(c).and_then(|tag| coerced(tag, arg)))
        .collect()
}
