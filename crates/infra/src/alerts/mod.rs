//! Operator alerting.
//!
//! Alert sinks are best-effort side channels. Nothing in the stock engine or the
//! sweeper ever fails because an alert could not be delivered.

pub mod dispatcher;
pub mod sink;

pub use dispatcher::AlertDispatcher;
pub use sink::{
    AlertError, AlertSink, FanoutAlertSink, LogAlertSink, NullAlertSink, RecordingAlertSink,
};
