use serde::{Deserialize, Serialize};

use crate::error::AppLockError;
use crate::shell::exec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub tag: String,
    pub title: String,
    pub text: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            tag: "AppLockService".to_string(),
            title: "App Lock Service".to_string(),
            text: "App lock service is running".to_string(),
        }
    }
}

pub trait Notifier: Send {
    fn post(&self, notification: &NotificationConfig) -> Result<(), AppLockError>;
    fn cancel(&self, notification: &NotificationConfig) -> Result<(), AppLockError>;
}

/// Posts through `cmd notification`. The tag is the notification's identity,
/// so posting twice replaces rather than stacks.
pub struct ShellNotifier;

impl Notifier for ShellNotifier {
    fn post(&self, notification: &NotificationConfig) -> Result<(), AppLockError> {
        exec(
            "cmd",
            [
                "notification",
                "post",
                "-S",
                "bigtext",
                "-t",
                notification.title.as_str(),
                notification.tag.as_str(),
                notification.text.as_str(),
            ],
        )?;
        Ok(())
    }

    fn cancel(&self, notification: &NotificationConfig) -> Result<(), AppLockError> {
        exec("cmd", ["notification", "cancel", notification.tag.as_str()])?;
        Ok(())
    }
}
