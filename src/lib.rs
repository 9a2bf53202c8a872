//! Promises for single-threaded Rust: a value that is pending until it is
//! fulfilled or rejected exactly once, with `then`/`catch` chaining and the
//! `all`, `race` and `any` combinators.
//!
//! Reactions never run inside the call that registers them. They are queued
//! on the calling thread's [`EventLoop`], which runs them when the thread calls
//! [`EventLoop::run`] or [`EventLoop::block_on`].
//!
//! ```
//! use promise_loop::{EventLoop, Promise, State, Value};
//! use std::time::Duration;
//!
//! let fastest = Promise::race([
//!     Promise::resolve_delay(1, Duration::from_millis(50)),
//!     Promise::resolve_delay(2, Duration::from_millis(10)),
//! ]);
//! let all = Promise::all([Value::from(1), Promise::resolve(2).into()]);
//!
//! EventLoop::current().run().unwrap();
//! assert_eq!(fastest.state(), State::Fulfilled(2.into()));
//! assert_eq!(all.state(), State::Fulfilled(Value::List(vec![1.into(), 2.into()])));
//! ```

mod combinators;
pub mod config;
mod consumer;
pub mod event_loop;
mod promise;
mod value;

pub use config::{Config, ZeroDelay};
pub use consumer::Consumer;
pub use event_loop::EventLoop;
pub use promise::{Fulfill, Promise, Reject, State};
pub use value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The awaited future is still pending but the loop has nothing left to
    /// run, so nothing can ever wake it.
    #[error("event loop stalled with the awaited future still pending")]
    Stalled,
    /// The loop was entered again from one of its own tasks.
    #[error("event loop is already running on this thread")]
    Reentrant,
}
