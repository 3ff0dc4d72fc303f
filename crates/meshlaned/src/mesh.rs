//! Component assembly and the periodic refresh loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use meshlane_breaker::{BreakerSet, BreakerSettings, GuardedCaller, HealthFeedback};
use meshlane_core::MeshConfig;
use meshlane_core::config::RegistryConfig;
use meshlane_discovery::{Picker, Refresher, ServiceCache};
use meshlane_registry::{HttpRegistry, InMemoryRegistry, SelfRegistration, SharedRegistry, Traced};

use crate::api::{ApiState, build_router};

/// Which registry backend the daemon talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RegistryMode {
    /// Consul-compatible agent over HTTP.
    #[default]
    Http,
    /// Process-local registry for development.
    Memory,
}

/// Build the registry client for `mode`, tagged with operation names.
pub fn build_registry(mode: RegistryMode, config: &RegistryConfig) -> SharedRegistry {
    match mode {
        RegistryMode::Http => {
            let client = HttpRegistry::from_config(config);
            info!(address = %client.address(), "using HTTP registry");
            Arc::new(Traced::new(client))
        }
        RegistryMode::Memory => {
            info!("using in-memory registry");
            Arc::new(Traced::new(InMemoryRegistry::new()))
        }
    }
}

/// Every long-lived component of the daemon, wired together.
pub struct Mesh {
    pub refresher: Refresher,
    pub picker: Picker,
    pub breakers: Arc<BreakerSet>,
    pub feedback: HealthFeedback,
    pub registration: Option<SelfRegistration>,
    call_timeout: Duration,
    refresh_interval: Duration,
}

impl Mesh {
    /// Wire the components for a validated config.
    pub fn build(config: &MeshConfig, registry: SharedRegistry) -> Self {
        let cache = Arc::new(ServiceCache::from_config(&config.discovery));
        info!(
            services = cache.services().len(),
            strategy = cache.strategy_name(),
            "service cache initialized"
        );

        let refresher = Refresher::new(cache, SharedRegistry::clone(&registry));
        let picker = Picker::new(refresher.clone());

        let settings = BreakerSettings::from_config(&config.breaker);
        let breakers = Arc::new(BreakerSet::new(settings));
        let feedback = HealthFeedback::new(SharedRegistry::clone(&registry), &settings);

        let registration = config
            .agent
            .as_ref()
            .map(|agent| SelfRegistration::new(registry, agent.instance_spec()));

        Self {
            refresher,
            picker,
            breakers,
            feedback,
            registration,
            call_timeout: config.breaker.call_timeout(),
            refresh_interval: config.discovery.refresh_interval(),
        }
    }

    /// A call-site wrapper sharing this mesh's picker, breakers and feedback.
    pub fn guarded_caller(&self) -> GuardedCaller {
        GuardedCaller::new(
            self.picker.clone(),
            Arc::clone(&self.breakers),
            self.feedback.clone(),
            self.call_timeout,
        )
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            refresher: self.refresher.clone(),
            picker: self.picker.clone(),
            breakers: Arc::clone(&self.breakers),
        }
    }

    /// Run the daemon until `signal` resolves.
    ///
    /// The admin listener is bound before this process registers, so a
    /// bind failure leaves nothing behind in the registry. Once
    /// registered, the refresh loop is stopped and the registration
    /// withdrawn however serving ends, and only then is the serve
    /// result returned.
    pub async fn run<F>(&self, addr: SocketAddr, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding admin API on {addr}"))?;
        info!(addr = %listener.local_addr().unwrap_or(addr), "admin API listening");

        if let Some(registration) = &self.registration {
            registration
                .register_self()
                .await
                .context("self-registration failed")?;
        }

        // A failed initial refresh is not fatal: pickers trigger a
        // background refresh on first use.
        match self.refresher.refresh_all().await {
            Ok(report) => info!(
                updated = report.updated.len(),
                unchanged = report.unchanged.len(),
                "initial refresh complete"
            ),
            Err(e) => warn!(error = %e, "initial refresh incomplete"),
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let refresh_handle = tokio::spawn(run_refresh_loop(
            self.refresher.clone(),
            self.refresh_interval,
            shutdown_rx,
        ));

        let served = axum::serve(listener, build_router(self.api_state()))
            .with_graceful_shutdown(signal)
            .await;

        let _ = shutdown_tx.send(true);
        if let Err(e) = refresh_handle.await {
            warn!(error = %e, "refresh loop did not stop cleanly");
        }

        if let Some(registration) = &self.registration {
            if let Err(e) = registration.deregister_self().await {
                warn!(error = %e, "deregistration failed");
            }
        }

        served.context("admin API server failed")
    }
}

/// Refresh every service each `interval` until `shutdown` flips.
///
/// Failed refreshes are logged; the next tick retries them.
pub async fn run_refresh_loop(
    refresher: Refresher,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_ms = interval.as_millis() as u64, "refresh loop started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; startup already refreshed.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match refresher.refresh_all().await {
                    Ok(report) => debug!(
                        updated = report.updated.len(),
                        unchanged = report.unchanged.len(),
                        "periodic refresh complete"
                    ),
                    Err(e) => warn!(
                        failed = ?e.failed_services(),
                        error = %e,
                        "periodic refresh incomplete"
                    ),
                }
            }
            _ = shutdown.changed() => {
                info!("refresh loop shutting down");
                break;
            }
        }
    }
}
