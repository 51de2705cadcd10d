//! mysql-operator entry point.
//!
//! Starts the health server, waits for the leader lease, then runs the
//! InnoDBCluster controller until SIGTERM/SIGINT or until leadership is
//! lost.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use mysql_operator::config::OperatorConfig;
use mysql_operator::controller::context::Context;
use mysql_operator::group::PodGroupView;
use mysql_operator::health::{HealthState, run_health_server};
use mysql_operator::run_operator;
use mysql_operator::store::Stores;

/// How long in-flight cycles get to wind down after shutdown is requested
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const LEASE_NAME: &str = "mysql-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

fn lease_lock(client: &Client, config: &OperatorConfig) -> LeaseLock {
    LeaseLock::new(
        client.clone(),
        &config.pod_namespace,
        LeaseLockParams {
            holder_id: config.pod_name.clone(),
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    )
}

/// Poll the lease until this replica holds it.
async fn acquire_leadership(lock: &LeaseLock) {
    info!(lease = LEASE_NAME, "Waiting to acquire leadership");
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(LeaseLockResult::Acquired(_)) => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => debug!("Another replica leads, waiting"),
            Err(e) => warn!(error = %e, "Failed to acquire lease, retrying"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Renew the lease until a renewal fails or another replica takes it.
async fn hold_leadership(lock: LeaseLock) {
    loop {
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
        match lock.try_acquire_or_renew().await {
            Ok(LeaseLockResult::Acquired(_)) => {}
            Ok(_) => {
                error!("Lease taken by another replica");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to renew lease");
                return;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("mysql_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    let config = OperatorConfig::from_env()?;
    info!(?config, "Starting mysql-operator");

    let client = Client::try_default().await?;
    let health_state = Arc::new(HealthState::new());
    let shutdown = CancellationToken::new();

    // Health endpoints answer before the lease is held so standby replicas
    // stay live.
    let health = tokio::spawn(run_health_server(
        health_state.clone(),
        config.health_port,
        shutdown.clone(),
    ));

    let lock = lease_lock(&client, &config);
    tokio::select! {
        _ = acquire_leadership(&lock) => {}
        _ = shutdown_signal() => {
            info!("Shutdown requested while waiting for the leader lease");
            shutdown.cancel();
            return Ok(ExitCode::SUCCESS);
        }
    }
    let leadership = hold_leadership(lock);

    let stores = Stores::kube(client.clone());
    let group = Arc::new(PodGroupView::new(stores.pods.clone()));
    let ctx = Context::new(stores, group, config.settings(), Some(health_state.clone()))
        .with_events(client, Some(config.pod_name.clone()));

    let mut operator = tokio::spawn(run_operator(
        Arc::new(ctx),
        config.watch_namespace.clone(),
        config.max_concurrent_reconciles,
        shutdown.clone(),
    ));

    let (exit, operator_running) = tokio::select! {
        joined = &mut operator => {
            if let Err(e) = joined {
                error!(error = %e, "Controller task failed");
            }
            (ExitCode::FAILURE, false)
        }
        served = health => {
            match served {
                Ok(Err(e)) => error!(error = %e, "Health server failed"),
                Err(e) => error!(error = %e, "Health server task failed"),
                Ok(Ok(())) => warn!("Health server stopped"),
            }
            (ExitCode::FAILURE, true)
        }
        _ = leadership => {
            // Restart and re-enter the election rather than race the new leader.
            error!("Leader lease lost, exiting");
            shutdown.cancel();
            return Ok(ExitCode::FAILURE);
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            health_state.set_ready(false);
            (ExitCode::SUCCESS, true)
        }
    };

    shutdown.cancel();
    if operator_running && tokio::time::timeout(DRAIN_TIMEOUT, operator).await.is_err() {
        warn!(timeout = ?DRAIN_TIMEOUT, "Controller did not stop in time");
    }

    info!("Operator stopped");
    Ok(exit)
}

/// Resolves on SIGTERM or SIGINT.
///
/// Failing to install a handler leaves no way to stop gracefully, so it
/// is treated as fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
