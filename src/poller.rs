use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDateTime;

use crate::config::Config;
use crate::content_provider::{ContentProviderQuery, LockedPackageSource};
use crate::foreground::{self, UsageStatsSource};
use crate::lock_prompt::{ActivityLauncher, LockPrompt, LockRequest};
use crate::notification::{NotificationConfig, Notifier, ShellNotifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    NoUsageData,
    Unlocked(String),
    Locked(LockRequest),
}

/// The foreground poller: checks the top app once per interval and hands
/// locked ones to the lock prompt.
pub struct LockService {
    usage: Box<dyn UsageStatsSource>,
    provider: Box<dyn LockedPackageSource>,
    prompt: Box<dyn LockPrompt>,
    notifier: Box<dyn Notifier>,
    notification: NotificationConfig,
    poll_interval: Duration,
    usage_window: chrono::Duration,
    running: Arc<AtomicBool>,
}

impl LockService {
    pub fn new(
        usage: Box<dyn UsageStatsSource>,
        provider: Box<dyn LockedPackageSource>,
        prompt: Box<dyn LockPrompt>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            usage,
            provider,
            prompt,
            notifier,
            notification: NotificationConfig::default(),
            poll_interval: Duration::from_secs(1),
            usage_window: chrono::Duration::seconds(1000),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            foreground::source_for(config.foreground_source),
            Box::new(ContentProviderQuery::new(
                config.locked_packages_uri.as_str(),
                config.locked_package_column.as_str(),
            )),
            Box::new(ActivityLauncher::new(config.lock_activity.as_str())),
            Box::new(ShellNotifier),
        )
        .with_notification(config.notification.clone())
        .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
        .with_usage_window(chrono::Duration::seconds(config.usage_window_secs as i64))
    }

    pub fn with_notification(mut self, notification: NotificationConfig) -> Self {
        self.notification = notification;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_usage_window(mut self, window: chrono::Duration) -> Self {
        self.usage_window = window;
        self
    }

    /// Flag shared with whoever tears the service down.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Posts the foreground notification and polls until stopped.
    pub fn start(&self) {
        if let Err(e) = self.notifier.post(&self.notification) {
            log::warn!("failed to post service notification: {e}");
        }
        log::info!(
            "lock service started, polling every {}ms",
            self.poll_interval.as_millis()
        );

        while self.running.load(Ordering::SeqCst) {
            let now = chrono::Local::now().naive_local();
            match self.tick(now) {
                Ok(TickOutcome::Locked(request)) => {
                    log::info!("locked app in foreground: {}", request.package)
                }
                Ok(_) => {}
                Err(e) => log::warn!("poll tick failed: {e:#}"),
            }
            std::thread::sleep(self.poll_interval);
        }

        if let Err(e) = self.notifier.cancel(&self.notification) {
            log::warn!("failed to cancel service notification: {e}");
        }
        log::info!("lock service stopped");
    }

    pub fn tick(&self, now: NaiveDateTime) -> anyhow::Result<TickOutcome> {
        let stats = self
            .usage
            .query_usage_stats(now - self.usage_window, now)
            .context("usage stats query failed")?;

        let Some(current) = foreground::current_foreground(&stats) else {
            log::debug!("No usage stats available.");
            return Ok(TickOutcome::NoUsageData);
        };
        let current_app = current.package.clone();
        log::debug!("Current top app: {current_app}");

        let locked_packages = self
            .provider
            .locked_packages()
            .context("locked package query failed")?;

        if !locked_packages.contains(&current_app) {
            return Ok(TickOutcome::Unlocked(current_app));
        }

        let request = LockRequest {
            package: current_app,
            locked_packages,
        };
        self.prompt
            .launch(&request)
            .context("lock prompt launch failed")?;
        Ok(TickOutcome::Locked(request))
    }
}
