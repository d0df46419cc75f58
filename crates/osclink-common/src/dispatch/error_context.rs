//! Process-wide error context
//!
//! Error handlers receive a code, a message and a path but nothing of the
//! caller's state. A caller that needs its own context inside the handler
//! stores it here. The slot is guarded by a reentrant mutex so a handler
//! running inside [`scoped`] can read it back on the same thread.

use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::{const_reentrant_mutex, ReentrantMutex};

type Context = Arc<dyn Any + Send + Sync>;

static SLOT: ReentrantMutex<RefCell<Option<Context>>> = const_reentrant_mutex(RefCell::new(None));

/// Stores `value`, replacing any previous context
pub fn set<T: Any + Send + Sync>(value: T) {
    *SLOT.lock().borrow_mut() = Some(Arc::new(value));
}

/// Returns the stored context if it has type `T`
pub fn get<T: Any + Send + Sync>() -> Option<Arc<T>> {
    let current = SLOT.lock().borrow().clone();
    current.and_then(|ctx| ctx.downcast::<T>().ok())
}

/// Runs `f` with the stored context of type `T`
pub fn with<T: Any + Send + Sync, R>(f: impl FnOnce(Option<&T>) -> R) -> R {
    let ctx = get::<T>();
    f(ctx.as_deref())
}

/// Removes the stored context
pub fn clear() {
    SLOT.lock().borrow_mut().take();
}

/// Holds the slot for the duration of `f` with `value` stored, restoring
/// the previous context afterwards. Other threads wait until `f` returns.
pub fn scoped<T: Any + Send + Sync, R>(value: T, f: impl FnOnce() -> R) -> R {
    let guard = SLOT.lock();
    let previous = guard.borrow_mut().replace(Arc::new(value));
    let result = f();
    *guard.borrow_mut() = previous;
    result
}
