use thiserror::Error;

pub mod catalog;
pub mod dispatch;
pub mod provider;
pub mod register;

pub use catalog::{Catalog, CatalogProvider};
pub use dispatch::{CallContext, DispatchTable};
pub use provider::{EpisodeQuery, MovieQuery, Provider, SeasonQuery, ShowQuery, Titles};
pub use register::{register, Invocation, RegisterError, INVOCATION_ARGS};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("method {0} is not supported by this provider")]
    Unsupported(&'static str),
    #[error("invalid arguments for {method}: {reason}")]
    InvalidArguments { method: &'static str, reason: String },
    #[error("{0}")]
    Failed(String),
}

/// Process entry point for provider binaries: sets up logging, connects to
/// the bus named by `FLIX_BUS_SOCKET` and services the invocation in argv.
#[cfg(unix)]
pub async fn run_provider<P: Provider>(provider: P) -> anyhow::Result<()> {
    use anyhow::Context;
    use flix_bus::{resolve_socket_path, UdsBus};
    use flix_core::logging::{init_logging, resolve_log_dir, LogSettings};
    use flix_core::StderrNotifier;
    use std::sync::Arc;

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let instance = args.first().cloned().unwrap_or_default();
    let _log_guard = init_logging(&LogSettings {
        component: "flix-provider".to_string(),
        instance: instance.clone(),
        log_dir: resolve_log_dir(""),
        debug: false,
        stderr: false,
    });

    let bus = UdsBus::new(resolve_socket_path(""), instance);
    register(Arc::new(provider), args, &bus, &StderrNotifier)
        .await
        .context("provider invocation failed")?;
    Ok(())
}
