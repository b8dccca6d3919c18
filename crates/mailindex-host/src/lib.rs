//! Native messaging host: framed request loop, lifecycle and lane dispatch.

mod cli;
mod handlers;
mod lanes;
mod logging;
mod router;

pub use cli::Cli;
pub use lanes::ExitHook;
pub use logging::{default_log_dir, init_tracing};
pub use router::{route, serve, HostOptions, Route, READER_METHODS, WRITER_METHODS};
