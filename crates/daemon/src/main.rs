//! ChopShop Daemon Binary
//!
//! Runs the rollover scheduler and the claim-service IPC server. Holds the
//! ledger snapshot's write lock for its whole lifetime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tracing::{error, info, warn};

use chopshop_aggregator::FsArtifactStore;
use chopshop_core::ChopsError;
use chopshop_crypto::VoucherSigner;
use chopshop_daemon::{
    run_scheduled, voucher_domain, ClaimService, CoordinatorConfig, DaemonError, EpochCoordinator,
    IpcConfig, IpcServer,
};
use chopshop_keystore::{load_signer, ADMIN_KEY_ENV, SIGNER_KEY_ENV};
use chopshop_logging::init_logging;
use chopshop_settings::Settings;
use chopshop_settlement::{MockLedger, StateLock};

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    init_logging(false);

    info!("Starting ChopShop daemon...");

    let settings = Settings::load_or_default().map_err(ChopsError::from)?;
    settings.validate().map_err(ChopsError::from)?;

    let signer_key = load_signer(SIGNER_KEY_ENV, settings.signer.key_file.as_deref())
        .map_err(ChopsError::from)?;
    let admin_key = load_signer(ADMIN_KEY_ENV, settings.coordinator.admin_key_file.as_deref())
        .map_err(ChopsError::from)?;

    let state_path = settings.ledger.state_path.clone();
    if !state_path.exists() {
        return Err(ChopsError::Configuration(format!(
            "no ledger state at {:?}; run `chopshop ledger-init` first",
            state_path
        ))
        .into());
    }
    let state_lock =
        StateLock::acquire(&state_path).map_err(|e| ChopsError::Configuration(e.to_string()))?;
    let ledger = MockLedger::load_from(&state_path, admin_key.address())
        .map_err(|e| ChopsError::Configuration(e.to_string()))?;
    ledger.autosave_to(&state_path);

    let snapshot = ledger.snapshot();
    if snapshot.voucher_signer != signer_key.address() {
        warn!(
            "Ledger trusts voucher signer {}, but this daemon signs as {}",
            snapshot.voucher_signer,
            signer_key.address()
        );
    }
    if !snapshot.root_setters.contains(&admin_key.address()) {
        warn!("{} does not hold the root-setter role; publishing will fail", admin_key.address());
    }

    let store = Arc::new(FsArtifactStore::new(settings.coordinator.artifact_dir.clone()));
    let coordinator = Arc::new(EpochCoordinator::new(
        ledger.clone(),
        ledger.clone(),
        Arc::clone(&store),
        CoordinatorConfig::from_settings(&settings),
    ));

    let signer = VoucherSigner::new(signer_key, voucher_domain(&settings.signer))
        .with_validity(settings.signer.validity_secs);
    let service = ClaimService::new(signer, ledger.clone(), Arc::clone(&store))
        .with_max_stars_per_claim(settings.signer.max_stars_per_claim);

    let (event_tx, _) = broadcast::channel::<String>(64);
    let config = IpcConfig {
        socket_path: settings.daemon.socket_path.clone(),
    };
    info!("Daemon starting, will listen on {:?}", config.socket_path);
    let mut ipc = IpcServer::new(config);
    ipc.set_event_sender(event_tx.clone());

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let scheduler = {
        let coordinator = Arc::clone(&coordinator);
        let period = Duration::from_secs(settings.coordinator.interval_secs);
        tokio::spawn(async move {
            run_scheduled(
                &coordinator,
                period,
                async {
                    let _ = stop_rx.await;
                },
                |outcome| {
                    if let Ok(result) = outcome {
                        if let Ok(json) = serde_json::to_string(result) {
                            let _ = event_tx.send(json);
                        }
                    }
                },
            )
            .await
        })
    };

    // Run until interrupted
    tokio::select! {
        result = ipc.start(service) => {
            if let Err(e) = result {
                error!("IPC server error: {}", e);
                let _ = stop_tx.send(());
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    let _ = stop_tx.send(());
    match scheduler.await {
        Ok(cycles) => info!("Scheduler ran {} cycles", cycles),
        Err(e) => warn!("Scheduler task ended abnormally: {}", e),
    }
    if let Err(e) = ledger.save_to(&state_path) {
        warn!("Failed to persist ledger state: {}", e);
    }
    let _ = std::fs::remove_file(ipc.socket_path());
    drop(state_lock);

    info!("Daemon stopped");
    Ok(())
}
