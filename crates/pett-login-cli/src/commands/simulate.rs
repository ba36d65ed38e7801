//! In-process end-to-end handshake.
//!
//! Opens the dashboard and the login popup in an in-memory browser, types
//! the given email and code into the popup, and lets the parent exchange the
//! delivered credential with the backend.

use super::{http_backend, Dashboard};
use crate::output::{self, OutputFormat};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use handshake_protocol::PopupStatus;
use login_handshake::{
    AuthSessionMachine, ChildLoginMachine, HandshakeConfig, MemoryIdentityProvider,
    SessionSnapshot, SessionState, WindowHost,
};
use parking_lot::Mutex;
use pett_backend::{
    BackendClient, BackendResult, HealthReport, LoginResponse, PetHealth, WebsocketHealth,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{info, warn};

/// Poll interval while waiting for the parent to settle.
const SETTLE_POLL: Duration = Duration::from_millis(10);

pub struct SimulateArgs {
    pub email: String,
    pub code: String,
    pub token: String,
    pub pet_name: Option<String>,
    pub offline: bool,
}

/// Backend that accepts any credential and asks for a pet until one is registered.
#[derive(Default)]
struct OfflineBackend {
    pet: Mutex<Option<String>>,
}

impl OfflineBackend {
    fn pet(&self) -> Option<String> {
        self.pet.lock().clone()
    }
}

#[async_trait]
impl BackendClient for OfflineBackend {
    async fn exchange_token(&self, _token: &str) -> BackendResult<LoginResponse> {
        Ok(match self.pet() {
            Some(name) => LoginResponse {
                success: true,
                name: Some(name),
                ..Default::default()
            },
            None => LoginResponse {
                requires_registration: true,
                ..Default::default()
            },
        })
    }

    async fn register_pet(&self, _token: &str, pet_name: &str) -> BackendResult<LoginResponse> {
        *self.pet.lock() = Some(pet_name.to_string());
        Ok(LoginResponse {
            success: true,
            name: Some(pet_name.to_string()),
            ..Default::default()
        })
    }

    async fn logout(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn health(&self) -> BackendResult<HealthReport> {
        let pet = self.pet();
        Ok(HealthReport {
            websocket: WebsocketHealth {
                authenticated: pet.is_some(),
                auth_token_present: pet.is_some(),
                connected: true,
            },
            pet: PetHealth {
                connected: pet.is_some(),
                name: pet,
            },
        })
    }
}

/// Run the whole handshake and print the resulting session.
pub async fn simulate(
    config: &HandshakeConfig,
    args: SimulateArgs,
    format: &OutputFormat,
) -> Result<()> {
    let (dashboard, backend): (Dashboard, Arc<dyn BackendClient>) = if args.offline {
        (
            Dashboard::open(config, None)?,
            Arc::new(OfflineBackend::default()),
        )
    } else {
        (Dashboard::open_default(config)?, http_backend(config)?)
    };

    let snapshot = run_handshake(&dashboard, config, backend, &args).await?;
    dashboard.persist()?;
    output::print_snapshot("Simulated login", &snapshot, format);

    match snapshot.state {
        SessionState::SignedIn => Ok(()),
        SessionState::NeedsRegistration => {
            bail!("the backend needs a pet name for this account, pass --pet-name")
        }
        state => bail!(
            "login did not complete ({:?}): {}",
            state,
            snapshot.last_error.as_deref().unwrap_or("no error reported")
        ),
    }
}

async fn run_handshake(
    dashboard: &Dashboard,
    config: &HandshakeConfig,
    backend: Arc<dyn BackendClient>,
    args: &SimulateArgs,
) -> Result<SessionSnapshot> {
    let (machine, streams) = dashboard.machine(config, backend)?;
    let machine = Arc::new(machine);
    let mut opened = dashboard.browser.watch_opened();
    let runner = {
        let machine = machine.clone();
        tokio::spawn(async move { machine.run(streams).await })
    };

    let result = drive(&machine, &mut opened, config, args).await;
    runner.abort();
    result?;
    Ok(machine.snapshot())
}

async fn drive(
    machine: &AuthSessionMachine,
    opened: &mut tokio::sync::mpsc::UnboundedReceiver<window_transport::MemoryWindow>,
    config: &HandshakeConfig,
    args: &SimulateArgs,
) -> Result<()> {
    let handle = machine.login()?;
    info!(popup = %handle.name(), "Popup opened");
    let popup = opened.recv().await.context("popup window was not opened")?;

    let identity = Arc::new(
        MemoryIdentityProvider::new(args.token.clone())
            .with_code(args.code.clone())
            .with_storage(popup.storage()),
    );
    let child = ChildLoginMachine::new(config, WindowHost::from_memory(&popup), identity);

    match child.start().await? {
        PopupStatus::Prompting => {
            child.submit_email(&args.email).await?;
            child.submit_code(&args.code).await?;
        }
        PopupStatus::Completed => info!("Popup reused an existing identity session"),
        status => bail!("popup stopped in state {}: {}", status, child.message()),
    }

    let limit = config.request_timeout() + Duration::from_secs(5);
    let state = wait_until_settled(machine, limit).await?;
    if state == SessionState::NeedsRegistration {
        match &args.pet_name {
            Some(name) => {
                machine.register_pet(name).await?;
            }
            None => warn!("Backend asked for a pet name but none was given"),
        }
    }
    Ok(())
}

/// Wait for the parent to leave its busy states.
async fn wait_until_settled(machine: &AuthSessionMachine, limit: Duration) -> Result<SessionState> {
    let started = Instant::now();
    timeout(limit, async {
        loop {
            let state = machine.state();
            if !state.is_busy() {
                return state;
            }
            sleep(SETTLE_POLL).await;
        }
    })
    .await
    .with_context(|| {
        format!(
            "parent still {:?} after {:?}",
            machine.state(),
            started.elapsed()
        )
    })
}
