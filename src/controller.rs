//! Adaptive Rate Controller (C3): classifies tournament activity into a
//! mode, derives the effective outbound rate from it, and notifies the
//! match poller to retime itself, the same "single piece of shared state
//! behind an `RwLock`, touched by a periodic ticker" shape as the
//! teacher's `AppState::topic_channels`.

use crate::error::CoreResult;
use crate::models::RateMode;
use crate::scheduler::Scheduler;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

const DEV_MODE_DURATION: Duration = Duration::from_secs(3 * 3600);
const LIFECYCLE_RECHECK_DELAY: Duration = Duration::from_millis(500);

fn stale_tournament_age() -> ChronoDuration {
    ChronoDuration::days(7)
}

/// The slice of a tournament's attributes the classifier needs. Decoupled
/// from `TournamentRecord` so the classification logic stays a pure
/// function testable without a JSON payload.
#[derive(Debug, Clone)]
pub struct TournamentSnapshot {
    pub id: String,
    pub state: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub starts_at: Option<DateTime<Utc>>,
}

/// What one `Check()` pass decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub mode: RateMode,
    pub active_tournament_id: Option<String>,
}

/// Step 1-5 of §4.3's classification algorithm, kept pure so it can be
/// unit tested against hand-built snapshots instead of a live provider.
pub fn classify(tournaments: &[TournamentSnapshot], now: DateTime<Utc>, upcoming_window: Duration) -> Classification {
    let live: Vec<&TournamentSnapshot> = tournaments
        .iter()
        .filter(|t| match t.started_at {
            Some(started) => now - started <= stale_tournament_age(),
            None => true,
        })
        .collect();

    if let Some(underway) = live.iter().find(|t| t.state.as_deref() == Some("underway")) {
        return Classification { mode: RateMode::Active, active_tournament_id: Some(underway.id.clone()) };
    }

    let window = ChronoDuration::from_std(upcoming_window).unwrap_or(ChronoDuration::zero());
    if let Some(upcoming) = live.iter().find(|t| t.starts_at.map(|s| s - now <= window).unwrap_or(false)) {
        return Classification { mode: RateMode::Upcoming, active_tournament_id: Some(upcoming.id.clone()) };
    }

    Classification { mode: RateMode::Idle, active_tournament_id: None }
}

/// Implemented by `poller::MatchPoller` so C3 can retime it without this
/// module importing C5 directly.
pub trait PollerControl: Send + Sync {
    fn retime(&self, mode: RateMode, dev_mode_active: bool);
}

pub type TournamentsFetchFn = Arc<dyn Fn() -> BoxFuture<'static, CoreResult<Vec<TournamentSnapshot>>> + Send + Sync>;

#[derive(Debug, Clone)]
struct DevModeState {
    active: bool,
    activated_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl Default for DevModeState {
    fn default() -> Self {
        Self { active: false, activated_at: None, expires_at: None }
    }
}

impl DevModeState {
    /// Dev mode expiry is re-checked here on every read, per the resolved
    /// open question, in addition to the scheduled auto-disable task.
    fn is_active(&self, now: DateTime<Utc>) -> bool {
        match (self.active, self.expires_at) {
            (true, Some(expires_at)) => now < expires_at,
            (true, None) => true,
            (false, _) => false,
        }
    }
}

struct ControllerState {
    mode: RateMode,
    manual_override: Option<RateMode>,
    active_tournament_id: Option<String>,
    dev_mode: DevModeState,
    last_check: Option<DateTime<Utc>>,
    next_check: Option<DateTime<Utc>>,
}

pub struct RateController {
    state: RwLock<ControllerState>,
    mode_rate_idle: u32,
    mode_rate_upcoming: u32,
    mode_rate_active: u32,
    manual_cap: u32,
    check_interval: Duration,
    upcoming_window: Duration,
    fetch_tournaments: TournamentsFetchFn,
    poller: RwLock<Option<Arc<dyn PollerControl>>>,
    scheduler: Scheduler,
}

impl RateController {
    pub fn new(
        mode_rate_idle: u32,
        mode_rate_upcoming: u32,
        mode_rate_active: u32,
        manual_cap: u32,
        check_interval: Duration,
        upcoming_window: Duration,
        fetch_tournaments: TournamentsFetchFn,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(ControllerState {
                mode: RateMode::Idle,
                manual_override: None,
                active_tournament_id: None,
                dev_mode: DevModeState::default(),
                last_check: None,
                next_check: None,
            }),
            mode_rate_idle,
            mode_rate_upcoming,
            mode_rate_active,
            manual_cap,
            check_interval,
            upcoming_window,
            fetch_tournaments,
            poller: RwLock::new(None),
            scheduler: Scheduler::new(),
        })
    }

    pub async fn set_poller_control(&self, poller: Arc<dyn PollerControl>) {
        *self.poller.write().await = Some(poller);
    }

    /// `CurrentMode() -> mode`. Honors `manual_override` if set.
    pub async fn current_mode(&self) -> RateMode {
        let state = self.state.read().await;
        state.manual_override.unwrap_or(state.mode)
    }

    pub async fn active_tournament_id(&self) -> Option<String> {
        self.state.read().await.active_tournament_id.clone()
    }

    /// `EffectiveRate() -> req/min`. Ignored when dev mode is active; the
    /// gate treats a zero `MinDelay` as "dev mode bypass" in that case.
    pub async fn effective_rate(&self) -> u32 {
        let mode = self.current_mode().await;
        let base = match mode {
            RateMode::Idle => self.mode_rate_idle,
            RateMode::Upcoming => self.mode_rate_upcoming,
            RateMode::Active => self.mode_rate_active,
        };
        base.min(self.manual_cap).max(1)
    }

    /// `MinDelay()`, per §5: `ceil(60000ms / effective_rate)`, collapsing
    /// to zero while dev mode holds.
    pub async fn min_delay(&self) -> Duration {
        if self.dev_mode_active().await {
            return Duration::ZERO;
        }
        let rate = self.effective_rate().await;
        Duration::from_millis((60_000 + rate as u64 - 1) / rate as u64)
    }

    pub async fn dev_mode_active(&self) -> bool {
        self.state.read().await.dev_mode.is_active(Utc::now())
    }

    /// Synchronous snapshot of `min_delay()`, for C2's `MinDelayFn`: the
    /// gate's dispatch loop calls this from a plain `Fn`, not an async
    /// context, so it can't await the state lock. Falls back to the idle
    /// rate on the rare contested read rather than block the dispatcher.
    pub fn min_delay_sync(&self) -> Duration {
        let Ok(state) = self.state.try_read() else {
            return Duration::from_millis((60_000 + self.mode_rate_idle.max(1) as u64 - 1) / self.mode_rate_idle.max(1) as u64);
        };
        if state.dev_mode.is_active(Utc::now()) {
            return Duration::ZERO;
        }
        let mode = state.manual_override.unwrap_or(state.mode);
        let base = match mode {
            RateMode::Idle => self.mode_rate_idle,
            RateMode::Upcoming => self.mode_rate_upcoming,
            RateMode::Active => self.mode_rate_active,
        };
        let rate = base.min(self.manual_cap).max(1);
        Duration::from_millis((60_000 + rate as u64 - 1) / rate as u64)
    }

    /// `Check()`: classify via a provider lookup, update mode, recompute
    /// `next_check`, and notify C5 to retime.
    pub async fn check(&self) -> CoreResult<Classification> {
        let tournaments = (self.fetch_tournaments)().await?;
        let now = Utc::now();
        let classification = classify(&tournaments, now, self.upcoming_window);

        {
            let mut state = self.state.write().await;
            state.mode = classification.mode;
            state.active_tournament_id = classification.active_tournament_id.clone();
            state.last_check = Some(now);
            state.next_check = Some(now + ChronoDuration::from_std(self.check_interval).unwrap_or_else(|_| ChronoDuration::zero()));
        }

        info!(mode = %classification.mode, "rate controller checked tournament activity");
        self.notify_poller().await;
        Ok(classification)
    }

    /// `SetOverride(mode|auto)`. Passing `None` clears the override and
    /// immediately re-runs `Check()`.
    pub async fn set_override(&self, mode: Option<RateMode>) -> CoreResult<()> {
        {
            let mut state = self.state.write().await;
            state.manual_override = mode;
        }
        self.notify_poller().await;
        if mode.is_none() {
            self.check().await?;
        }
        Ok(())
    }

    /// `EnableDevMode()`: collapses rate limiting, schedules auto-disable
    /// after 3h, and retimes the poller to its fast floor.
    pub async fn enable_dev_mode(self: &Arc<Self>) {
        let now = Utc::now();
        {
            let mut state = self.state.write().await;
            state.dev_mode = DevModeState {
                active: true,
                activated_at: Some(now),
                expires_at: Some(now + ChronoDuration::from_std(DEV_MODE_DURATION).unwrap_or_else(|_| ChronoDuration::zero())),
            };
        }
        info!("dev mode enabled, auto-disabling in 3h");
        self.notify_poller().await;

        let weak = Arc::downgrade(self);
        self.scheduler.schedule_after(DEV_MODE_DURATION, async move {
            if let Some(this) = weak.upgrade() {
                this.disable_dev_mode().await;
            }
        });
    }

    pub async fn disable_dev_mode(&self) {
        {
            let mut state = self.state.write().await;
            state.dev_mode = DevModeState::default();
        }
        info!("dev mode disabled");
        self.notify_poller().await;
    }

    /// Schedules an immediate re-check 500ms out, for C7's lifecycle hook.
    pub fn schedule_lifecycle_recheck(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.scheduler.schedule_after(LIFECYCLE_RECHECK_DELAY, async move {
            if let Some(this) = weak.upgrade() {
                if let Err(err) = this.check().await {
                    tracing::warn!(error = %err, "lifecycle-triggered rate check failed");
                }
            }
        });
    }

    async fn notify_poller(&self) {
        let mode = self.current_mode().await;
        let dev_active = self.dev_mode_active().await;
        if let Some(poller) = self.poller.read().await.as_ref() {
            poller.retime(mode, dev_active);
        }
    }

    pub async fn last_check(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_check
    }

    pub async fn next_check(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.next_check
    }

    /// Spawns the periodic ticker, the same `interval.tick().await` loop
    /// shape as the teacher's purge worker, parameterized by
    /// `check_interval` instead of a fixed period.
    pub fn spawn_ticker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let period = self.check_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                if let Err(err) = this.check().await {
                    tracing::warn!(error = %err, "periodic rate check failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, state: Option<&str>, started_days_ago: Option<i64>, starts_in_hours: Option<i64>) -> TournamentSnapshot {
        let now = Utc::now();
        TournamentSnapshot {
            id: id.to_string(),
            state: state.map(str::to_string),
            started_at: started_days_ago.map(|d| now - ChronoDuration::days(d)),
            starts_at: starts_in_hours.map(|h| now + ChronoDuration::hours(h)),
        }
    }

    #[test]
    fn underway_tournament_forces_active() {
        let now = Utc::now();
        let tournaments = vec![snapshot("T1", Some("underway"), Some(1), None)];
        let result = classify(&tournaments, now, Duration::from_secs(48 * 3600));
        assert_eq!(result.mode, RateMode::Active);
        assert_eq!(result.active_tournament_id, Some("T1".to_string()));
    }

    #[test]
    fn stale_underway_tournament_is_ignored() {
        let now = Utc::now();
        let tournaments = vec![snapshot("T1", Some("underway"), Some(10), None)];
        let result = classify(&tournaments, now, Duration::from_secs(48 * 3600));
        assert_eq!(result.mode, RateMode::Idle);
    }

    #[test]
    fn upcoming_within_window_sets_upcoming_mode() {
        let now = Utc::now();
        let tournaments = vec![snapshot("T2", Some("pending"), None, Some(10))];
        let result = classify(&tournaments, now, Duration::from_secs(48 * 3600));
        assert_eq!(result.mode, RateMode::Upcoming);
        assert_eq!(result.active_tournament_id, Some("T2".to_string()));
    }

    #[test]
    fn nothing_underway_or_upcoming_is_idle() {
        let now = Utc::now();
        let tournaments = vec![snapshot("T3", Some("complete"), Some(1), None)];
        let result = classify(&tournaments, now, Duration::from_secs(48 * 3600));
        assert_eq!(result.mode, RateMode::Idle);
        assert_eq!(result.active_tournament_id, None);
    }

    #[test]
    fn underway_takes_priority_over_upcoming() {
        let now = Utc::now();
        let tournaments =
            vec![snapshot("T2", Some("pending"), None, Some(1)), snapshot("T1", Some("underway"), Some(1), None)];
        let result = classify(&tournaments, now, Duration::from_secs(48 * 3600));
        assert_eq!(result.mode, RateMode::Active);
        assert_eq!(result.active_tournament_id, Some("T1".to_string()));
    }

    #[test]
    fn dev_mode_expiry_is_honored_even_without_the_scheduled_disable() {
        let now = Utc::now();
        let state = DevModeState { active: true, activated_at: Some(now), expires_at: Some(now - ChronoDuration::seconds(1)) };
        assert!(!state.is_active(now));
    }

    #[tokio::test]
    async fn effective_rate_is_capped_by_manual_cap() {
        let fetch: TournamentsFetchFn = Arc::new(|| Box::pin(async { Ok(vec![]) }));
        let controller = RateController::new(6, 20, 60, 10, Duration::from_secs(8 * 3600), Duration::from_secs(48 * 3600), fetch);
        controller.check().await.unwrap();
        assert_eq!(controller.effective_rate().await, 6);
    }

    #[tokio::test]
    async fn min_delay_collapses_to_zero_in_dev_mode() {
        let fetch: TournamentsFetchFn = Arc::new(|| Box::pin(async { Ok(vec![]) }));
        let controller = RateController::new(6, 20, 60, 60, Duration::from_secs(8 * 3600), Duration::from_secs(48 * 3600), fetch);
        controller.enable_dev_mode().await;
        assert_eq!(controller.min_delay().await, Duration::ZERO);
    }
}
