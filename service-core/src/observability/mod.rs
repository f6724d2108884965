pub mod logging;

pub use logging::{LogFormat, TracingGuard, init_tracing};
