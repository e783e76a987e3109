//! Periodic deletion of expired tokens.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::metrics::record_purged;
use super::CredentialService;

/// Spawn the sweeper. Returns `None` when `period` is zero.
pub fn spawn_expiry_sweeper(service: CredentialService, period: Duration) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        tracing::info!("Expired token sweeper disabled");
        return None;
    }

    tracing::info!(period_seconds = period.as_secs(), "Starting expired token sweeper");

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep_once(&service).await;
        }
    }))
}

pub async fn sweep_once(service: &CredentialService) {
    match service.purge_expired().await {
        Ok(report) => {
            record_purged("refresh", report.refresh_tokens);
            record_purged("password_reset", report.password_reset_tokens);
            record_purged("email_verification", report.email_verification_tokens);
            if report.total() > 0 {
                tracing::info!(
                    refresh_tokens = report.refresh_tokens,
                    password_reset_tokens = report.password_reset_tokens,
                    email_verification_tokens = report.email_verification_tokens,
                    "Expired tokens purged"
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "Expired token sweep failed"),
    }
}
