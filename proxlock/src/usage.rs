//! Low request limit banner and the poller keeping usage counters fresh.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::models::users::User;
use crate::store::UserRepository;

/// Usage ratio at which the banner appears unless configured otherwise
pub const DEFAULT_LOW_USAGE_THRESHOLD: f64 = 0.9;

/// The low request limit banner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageBanner {
    pub usage: u64,
    pub limit: u64,
    /// Requests left before the limit; zero once the limit is exceeded
    pub remaining: u64,
    /// Share of the limit left, in percent
    pub percent_left: f64,
}

impl UsageBanner {
    /// The banner to show for `user`, if any.
    ///
    /// Shown when both counters are known, the limit is positive and at least `threshold` of it is
    /// used. Never shown on the pricing view, where the user is already looking at plans.
    pub fn evaluate(user: &User, threshold: f64, on_pricing_view: bool) -> Option<Self> {
        if on_pricing_view {
            return None;
        }
        let (usage, limit) = (user.current_request_usage?, user.request_limit?);
        if limit == 0 || (usage as f64 / limit as f64) < threshold {
            return None;
        }

        let remaining = limit.saturating_sub(usage);
        Some(Self {
            usage,
            limit,
            remaining,
            percent_left: remaining as f64 * 100.0 / limit as f64,
        })
    }

    pub fn message(&self) -> String {
        let plural = if self.remaining == 1 { "" } else { "s" };
        format!(
            "Low Request Limit: you have {} request{plural} remaining ({:.0}% left). Upgrade your plan to get more requests.",
            self.remaining, self.percent_left
        )
    }
}

/// Refetch the user every `interval` until `shutdown` fires. The first fetch happens right away.
pub async fn run_usage_poller(users: Arc<UserRepository>, interval: Duration, shutdown: CancellationToken) {
    tracing::info!(refresh_interval = ?interval, "Starting usage poller");

    loop {
        let section = users.fetch().await;
        if let Some(error) = &section.error {
            tracing::debug!(error = %error, "Usage refresh failed, keeping the poller alive");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => {
                tracing::info!("Usage poller shutting down");
                return;
            }
        }
    }
}
