pub mod level;
pub mod record;
pub mod error;
pub mod context;
pub mod normalizer;
pub mod sink;
pub mod file_sink;
pub mod console_sink;
pub mod noop_sink;
pub mod queued_sink;
pub mod backend;

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;

pub mod env;
pub mod config;
pub mod pipeline;
pub mod middleware;
pub mod layer;
pub mod init;

pub use context::{ContextStore, RequestContext};
pub use level::Level;
pub use pipeline::Pipeline;
pub use record::{CanonicalRecord, ExceptionInfo, Fields};
