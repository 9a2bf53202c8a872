//! Event loop configuration.

/// Where zero-delay tasks go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroDelay {
    /// A FIFO ready queue that is always drained before any timer fires.
    #[default]
    Queue,
    /// The timer heap, with a deadline of "now". Zero-delay tasks then order
    /// against due timers by deadline, like a `setTimeout(f, 0)` host.
    Timer,
}

/// Settings for an [`EventLoop`](crate::EventLoop).
///
/// # Examples
///
/// ```
/// use promise_loop::{Config, EventLoop, ZeroDelay};
/// let event_loop = EventLoop::current();
/// event_loop.set_config(Config::default().zero_delay(ZeroDelay::Timer));
/// assert_eq!(event_loop.config().zero_delay, ZeroDelay::Timer);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub zero_delay: ZeroDelay,
}

impl Config {
    pub fn zero_delay(mut self, zero_delay: ZeroDelay) -> Self {
        self.zero_delay = zero_delay;
        self
    }
}
