//! Line-delimited JSON protocol over stdin/stdout

pub mod dispatcher;
pub mod output;
pub mod protocol;

pub use dispatcher::Dispatcher;
pub use output::{EventSink, Outbound, OutboundReceiver};
pub use protocol::{Command, CommandError, CommandKind, ErrorKind, MessageType, Response};
