//! Constructor-injected logging, so this crate never touches global state.

/// Minimal logging seam every component takes as a constructor argument.
///
/// Callers format their own messages (with `format!` or ahead-of-time
/// `tracing` fields); this trait only decides where the already-formatted
/// line goes.
pub trait RpcLogger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default [`RpcLogger`] forwarding to the `tracing` macros. Embedders get
/// a stdout sink for free by installing `tracing_subscriber::fmt`; this
/// crate never installs a subscriber itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl RpcLogger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!("{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }
}
