//! Threads and handlers every module executes on.
mod handler;
mod thread;

pub use handler::{ContextualCallback, ContextualOnceCallback, Handler};
pub use thread::Thread;
