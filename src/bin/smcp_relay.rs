//! Runs the office relay on a TCP listener.
//!
//! Usage:
//!
//! ```text
//! smcp_relay [settings-path]
//! ```
//!
//! Without a path the built-in defaults apply. A representative settings
//! file is:
//!
//! ```toml
//! bind = "0.0.0.0:7800"
//! default_rpc_timeout_ms = 30000
//!
//! [log]
//! filter = "info,smcp::relay=debug"
//! ```
//!
//! The relay stops accepting connections on Ctrl-C.

use mockable::DefaultClock;
use smcp::config::RelaySettings;
use smcp::relay::adapters::RelayServer;
use smcp::relay::services::SessionCoordinator;
use smcp::telemetry::init_tracing;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info_span};

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised before the relay starts serving.
#[derive(Debug, Error)]
enum LaunchError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("failed to build tokio runtime: {0}")]
    RuntimeInit(#[source] std::io::Error),
    #[error("failed to bind {bind}: {source}")]
    Bind {
        bind: String,
        #[source]
        source: std::io::Error,
    },
}

fn main() -> Result<(), BoxError> {
    let settings = match settings_path(env::args_os().skip(1))? {
        Some(path) => RelaySettings::load(&path)?,
        None => RelaySettings::default(),
    };
    init_tracing(&settings.log)?;
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(LaunchError::RuntimeInit)?;
    runtime.block_on(run(&settings))?;
    Ok(())
}

fn settings_path(
    mut args: impl Iterator<Item = std::ffi::OsString>,
) -> Result<Option<PathBuf>, LaunchError> {
    let path = args.next().map(PathBuf::from);
    if let Some(extra) = args.next() {
        return Err(LaunchError::InvalidArgs(format!(
            "unexpected extra argument: {}",
            extra.to_string_lossy()
        )));
    }
    Ok(path)
}

async fn run(settings: &RelaySettings) -> Result<(), LaunchError> {
    let listener = TcpListener::bind(&settings.bind)
        .await
        .map_err(|source| LaunchError::Bind {
            bind: settings.bind.clone(),
            source,
        })?;
    let span = info_span!("relay", bind = %settings.bind);
    let coordinator = SessionCoordinator::new(Arc::new(DefaultClock))
        .with_rpc_timeout(settings.rpc_timeout())
        .with_span(span.clone());
    let server = RelayServer::new(Arc::new(coordinator)).with_span(span.clone());

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "cannot listen for Ctrl-C");
        }
        trigger.cancel();
    });

    if let Err(err) = server.serve(listener, shutdown).await {
        error!(parent: &span, error = %err, "relay stopped");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn settings_path_is_optional() {
        let none = settings_path(std::iter::empty()).expect("no arguments");
        let some = settings_path([OsString::from("relay.toml")].into_iter()).expect("one path");

        assert_eq!(none, None);
        assert_eq!(some, Some(PathBuf::from("relay.toml")));
    }

    #[test]
    fn rejects_extra_arguments() {
        let args = [OsString::from("a.toml"), OsString::from("b.toml")];

        assert!(matches!(
            settings_path(args.into_iter()),
            Err(LaunchError::InvalidArgs(_))
        ));
    }
}
