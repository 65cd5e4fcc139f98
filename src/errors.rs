use std::fmt;

/// Errors surfaced by monitor operations. The lock state is left untouched
/// when any of these is returned; the embedding runtime maps them onto its
/// own exception objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// `exit`, `wait`, `notify` or `notify_all` invoked by a thread that
    /// does not own the monitor. The message classifies what the owner
    /// actually was at the time (see the failed-unlock diagnostic).
    IllegalMonitorState(String),
    /// `wait` called with a timeout outside the accepted range.
    IllegalArgument(String),
    /// A wait was unblocked by an interrupt and the caller asked for
    /// interrupts to be surfaced. The interrupted flag has been cleared and
    /// the monitor re-acquired by the time this is returned.
    Interrupted,
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::IllegalMonitorState(message) => {
                write!(f, "illegal monitor state: {message}")
            }
            MonitorError::IllegalArgument(message) => write!(f, "illegal argument: {message}"),
            MonitorError::Interrupted => f.write_str("interrupted"),
        }
    }
}

impl std::error::Error for MonitorError {}
