//! hellojohn authorization server entry point.
//!
//! # Purpose
//! Loads configuration from the environment (and optional YAML overrides),
//! then runs the server until Ctrl-C or SIGTERM.
use authserver::config::AuthServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AuthServerConfig::from_env_or_yaml()?;
    authserver::run_with_shutdown(config, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
