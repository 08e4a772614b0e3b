use crate::error::AppLockError;
use crate::shell::exec;

pub const EXTRA_PACKAGE_NAME: &str = "PACKAGE_NAME";
pub const EXTRA_LOCKED_PACKAGES: &str = "LOCKED_PACKAGES";

// Intent.FLAG_ACTIVITY_NEW_TASK | Intent.FLAG_ACTIVITY_CLEAR_TOP
const LAUNCH_FLAGS: &str = "0x14000000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub package: String,
    pub locked_packages: Vec<String>,
}

pub trait LockPrompt: Send {
    fn launch(&self, request: &LockRequest) -> Result<(), AppLockError>;
}

/// Starts the lock screen activity with `am start`.
pub struct ActivityLauncher {
    component: String,
}

impl ActivityLauncher {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    fn args(&self, request: &LockRequest) -> Vec<String> {
        vec![
            "start".to_string(),
            "-n".to_string(),
            self.component.clone(),
            "-f".to_string(),
            LAUNCH_FLAGS.to_string(),
            "--es".to_string(),
            EXTRA_PACKAGE_NAME.to_string(),
            request.package.clone(),
            "--esal".to_string(),
            EXTRA_LOCKED_PACKAGES.to_string(),
            request.locked_packages.join(","),
        ]
    }
}

impl LockPrompt for ActivityLauncher {
    fn launch(&self, request: &LockRequest) -> Result<(), AppLockError> {
        let output = exec("am", self.args(request))?;
        check_am_output(self.component.as_str(), output.as_str())
    }
}

// am reports resolution failures on stdout with a zero exit code
fn check_am_output(component: &str, output: &str) -> Result<(), AppLockError> {
    match output.lines().find(|line| line.starts_with("Error")) {
        Some(line) => Err(AppLockError::LaunchFailed {
            component: component.to_string(),
            message: line.trim().to_string(),
        }),
        None => Ok(()),
    }
}
