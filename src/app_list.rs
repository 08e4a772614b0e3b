use std::fmt::Write as _;

use image::DynamicImage;

use crate::error::AppLockError;
use crate::icon::decode_icon;
use crate::remote::{AppRecord, CollectionListener, RemoteCollection};

const TITLE: &str = "Lock App";

#[derive(Debug, Clone)]
pub struct LockableApp {
    pub package_name: String,
    pub name: String,
    pub icon: Option<DynamicImage>,
    // minutes
    pub interval: String,
    pub pin_code: String,
}

impl From<AppRecord> for LockableApp {
    fn from(record: AppRecord) -> Self {
        let icon = decode_icon(record.icon.as_str());
        if icon.is_none() && !record.icon.is_empty() {
            log::debug!("no usable icon for {}", record.package_name);
        }
        Self {
            package_name: record.package_name,
            name: record.name,
            icon,
            interval: record.interval,
            pin_code: record.pin_code,
        }
    }
}

/// What one card shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEntry {
    pub name: String,
    pub interval: String,
    pub pin: String,
    pub icon: Option<(u32, u32)>,
}

impl From<&LockableApp> for RenderedEntry {
    fn from(app: &LockableApp) -> Self {
        Self {
            name: app.name.clone(),
            interval: format!("{} Min", app.interval),
            pin: app.pin_code.clone(),
            icon: app.icon.as_ref().map(|img| (img.width(), img.height())),
        }
    }
}

/// The lockable-app list. Loading until the first snapshot arrives, then
/// always exactly the latest snapshot.
pub struct AppListView {
    apps: Vec<LockableApp>,
    loading: bool,
    appeared: bool,
    present: Box<dyn FnMut(&str)>,
}

impl Default for AppListView {
    fn default() -> Self {
        Self::new(Box::new(|_: &str| {}))
    }
}

impl AppListView {
    /// `present` receives the rendered view after every change.
    pub fn new(present: Box<dyn FnMut(&str)>) -> Self {
        Self {
            apps: Vec::new(),
            loading: true,
            appeared: false,
            present,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn apps(&self) -> &[LockableApp] {
        &self.apps
    }

    /// Starts the lock service the first time the view is shown.
    pub fn on_first_appear<F>(&mut self, start_service: F)
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        if self.appeared {
            return;
        }
        self.appeared = true;
        if let Err(e) = start_service() {
            log::error!("failed to start lock service: {e:#}");
        }
        self.redraw();
    }

    /// Shows the view and follows `collection` until its subscription ends.
    pub fn show<F>(&mut self, collection: &dyn RemoteCollection, start_service: F)
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        self.on_first_appear(start_service);
        collection.subscribe(self);
    }

    pub fn rendered(&self) -> Vec<RenderedEntry> {
        self.apps.iter().map(RenderedEntry::from).collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "==== {TITLE} ====");
        let _ = writeln!(out);

        if self.loading {
            let _ = writeln!(out, "Loading...");
            return out;
        }

        for entry in self.rendered() {
            let icon = match entry.icon {
                Some((w, h)) => format!("[icon {w}x{h}]"),
                None => "[no icon]".to_string(),
            };
            let _ = writeln!(out, "+----------------------------------------");
            let _ = writeln!(out, "| {icon} {}", entry.name);
            let _ = writeln!(out, "|   Interval: {}", entry.interval);
            let _ = writeln!(out, "|   Pin Code: {}", entry.pin);
            let _ = writeln!(out, "+----------------------------------------");
        }
        out
    }

    fn redraw(&mut self) {
        let screen = self.render();
        (self.present)(screen.as_str());
    }
}

impl CollectionListener for AppListView {
    fn on_data_change(&mut self, records: Vec<AppRecord>) {
        self.apps.clear();
        self.apps.extend(records.into_iter().map(LockableApp::from));
        self.loading = false;
        log::debug!("app list refreshed with {} entries", self.apps.len());
        self.redraw();
    }

    fn on_cancelled(&mut self, error: AppLockError) {
        log::error!("Error fetching data: {error}");
    }
}
