//! Backend session commands: health, restore and logout.

use super::{http_backend, Dashboard};
use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use login_handshake::HandshakeConfig;
use tracing::info;

/// Show `/api/health`.
pub async fn health(config: &HandshakeConfig, format: &OutputFormat) -> Result<()> {
    let backend = http_backend(config)?;
    let report = backend
        .health()
        .await
        .with_context(|| format!("backend at {} is unavailable", config.backend_url))?;
    output::print_health(&report, format);
    Ok(())
}

/// Adopt an existing backend session, if there is one.
pub async fn restore(config: &HandshakeConfig, format: &OutputFormat) -> Result<()> {
    let dashboard = Dashboard::open_default(config)?;
    let (machine, _streams) = dashboard.machine(config, http_backend(config)?)?;

    let state = machine.restore().await?;
    info!(state = ?state, "Restore finished");
    dashboard.persist()?;

    output::print_snapshot("Session", &machine.snapshot(), format);
    Ok(())
}

/// Sign out and force the next popup to drop its identity session.
pub async fn logout(config: &HandshakeConfig, format: &OutputFormat) -> Result<()> {
    let dashboard = Dashboard::open_default(config)?;
    let (machine, _streams) = dashboard.machine(config, http_backend(config)?)?;

    machine.logout().await?;
    dashboard.persist()?;

    output::print_snapshot("Signed out", &machine.snapshot(), format);
    Ok(())
}
