pub mod audio;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod error;
mod lock;
mod logging;
pub mod protocol;
pub mod session;
mod telemetry;
pub mod transport;

pub use logging::{
    crash_log_path, init_logging, log_debug, log_debug_content, log_file_path, log_panic,
    logging_enabled,
};
pub use telemetry::{init_tracing, tracing_log_path};

pub use error::SessionError;
pub use session::{
    ConnectionState, SessionConfig, SessionController, SessionEvent, SessionObserver,
};
