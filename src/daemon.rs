use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command};
use std::time::Duration;

use anyhow::Context;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::{Config, CONFIG_PATH_ENV};
use crate::shell::{exec, shell_exec, shell_exec_stderr};

const TMP_DIR: &str = "/data/local/tmp";
const FORK_PREFIX: &str = "alk-f-";
// bracketed so pkill's own command line never matches
const FORK_PATTERN: &str = "/data/local/tmp/[a]lk-f-";
const INSTALLED_BINARY: &str = "/data/local/tmp/app_lock";
const STARTUP_SCRIPT_PATH: &str = "/data/adb/service.d/app_lock.sh";
const STARTUP_SCRIPT: &str = r#"#!/system/bin/sh
/data/local/tmp/app_lock &
"#;
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);
// an empty pid file younger than this belongs to a start still in progress
const STARTING_GRACE: Duration = Duration::from_secs(10);

lazy_static::lazy_static! {
    static ref CURRENT_EXE: std::io::Result<std::path::PathBuf> = std::env::current_exe();
}

fn current_exe() -> anyhow::Result<&'static Path> {
    CURRENT_EXE
        .as_ref()
        .map(|p| p.as_path())
        .map_err(|e| anyhow::anyhow!("cannot locate own binary: {e}"))
}

/// Copies this binary under a random name so the daemon processes don't
/// share an obvious name.
fn fork_binary() -> anyhow::Result<String> {
    let random_name: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();

    let new_bin = format!("{TMP_DIR}/{FORK_PREFIX}{random_name}");
    std::fs::copy(current_exe()?, new_bin.as_str())
        .with_context(|| format!("failed to copy binary to {new_bin}"))?;
    shell_exec(format!("chmod 755 {new_bin}").as_str())?;

    Ok(new_bin)
}

fn spawn(args: &[&str]) -> anyhow::Result<Child> {
    let bin = fork_binary()?;
    let mut cmd = Command::new(bin.as_str());
    cmd.args(args);
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        cmd.env(CONFIG_PATH_ENV, path);
    }
    cmd.spawn()
        .with_context(|| format!("failed to spawn {bin} {}", args.join(" ")))
}

/// Kills every forked watchdog and poller.
fn kill_forks() {
    // pkill exits 1 when nothing matched
    if let Err(e) = exec("pkill", ["-f", FORK_PATTERN]) {
        log::debug!("pkill: {e}");
    }
}

/// Liveness of a process that isn't our child. A zombie still counts as alive,
/// so children are checked with `try_wait` instead.
pub fn is_alive(pid: u32) -> bool {
    // kill -0 prints to stderr when the process is gone
    match shell_exec_stderr(format!("kill -0 {pid}").as_str()) {
        Ok(stderr) => stderr.is_empty(),
        Err(_) => false,
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse::<u32>().ok()
}

/// Pid of the running watchdog, if any.
pub fn running_pid(config: &Config) -> Option<u32> {
    read_pid(Path::new(&config.pid_file)).filter(|pid| is_alive(*pid))
}

fn is_fresh(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age < STARTING_GRACE)
}

/// Creates the pid file exclusively. `None` means another watchdog is alive
/// or another start is writing the file right now.
fn claim_pid_file(path: &Path) -> anyhow::Result<Option<File>> {
    for _ in 0..2 {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => return Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to create {}", path.display()))
            }
        }

        match read_pid(path) {
            Some(pid) if is_alive(pid) => return Ok(None),
            None if is_fresh(path) => return Ok(None),
            _ => {
                log::info!("removing stale pid file {}", path.display());
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(e)
                            .with_context(|| format!("failed to remove {}", path.display()))
                    }
                }
            }
        }
    }
    Ok(None)
}

/// Starts the watchdog, which runs the poller, unless one is already running.
pub fn start_service(config: &Config) -> anyhow::Result<()> {
    let pid_path = Path::new(&config.pid_file);
    let Some(mut pid_file) = claim_pid_file(pid_path)? else {
        match running_pid(config) {
            Some(pid) => log::info!("lock service already running (watchdog pid {pid})"),
            None => log::info!("lock service is being started by another process"),
        }
        return Ok(());
    };

    // leftovers of a watchdog that died without its poller
    kill_forks();
    let started = shell_exec(format!("rm -f {TMP_DIR}/{FORK_PREFIX}*").as_str())
        .map_err(anyhow::Error::from)
        .and_then(|_| spawn(&["watchdog"]));
    let mut child = match started {
        Ok(child) => child,
        Err(e) => {
            let _ = std::fs::remove_file(pid_path);
            return Err(e);
        }
    };

    write!(pid_file, "{}", child.id())
        .with_context(|| format!("failed to write {}", config.pid_file))?;
    log::info!("watchdog pid: {}", child.id());

    // reap it should it exit while this process is still around
    std::thread::spawn(move || {
        let _ = child.wait();
    });
    Ok(())
}

/// Runs the poller as a child and respawns it whenever it exits.
pub fn watchdog() -> anyhow::Result<()> {
    supervise(|| spawn(&["poll"]), || true, WATCHDOG_INTERVAL)
}

fn supervise<S, K>(mut spawn: S, mut keep_going: K, interval: Duration) -> anyhow::Result<()>
where
    S: FnMut() -> anyhow::Result<Child>,
    K: FnMut() -> bool,
{
    let first = spawn()?;
    log::info!("lock service pid: {}", first.id());
    let mut child = Some(first);

    while keep_going() {
        std::thread::sleep(interval);

        let exited = match child.as_mut() {
            Some(c) => match c.try_wait() {
                Ok(Some(status)) => {
                    log::warn!("lock service {} exited ({status}), restarting", c.id());
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    log::warn!("cannot check lock service {}: {e}", c.id());
                    false
                }
            },
            None => true,
        };

        if exited {
            child = match spawn() {
                Ok(c) => {
                    log::info!("lock service pid: {}", c.id());
                    Some(c)
                }
                Err(e) => {
                    log::warn!("failed to restart lock service: {e:#}");
                    None
                }
            };
        }
    }

    if let Some(mut c) = child {
        let _ = c.kill();
        let _ = c.wait();
    }
    Ok(())
}

/// Puts a boot script in service.d and a stable copy of the binary next to it.
pub fn install() -> anyhow::Result<()> {
    std::fs::write(STARTUP_SCRIPT_PATH, STARTUP_SCRIPT)
        .with_context(|| format!("failed to write {STARTUP_SCRIPT_PATH}"))?;
    shell_exec(format!("chmod 755 {STARTUP_SCRIPT_PATH}").as_str())?;

    let binary = std::fs::read(current_exe()?).context("failed to read own binary")?;
    std::fs::write(INSTALLED_BINARY, binary)
        .with_context(|| format!("failed to write {INSTALLED_BINARY}"))?;
    shell_exec(format!("chmod 755 {INSTALLED_BINARY}").as_str())?;

    log::info!("installed {INSTALLED_BINARY} with boot script {STARTUP_SCRIPT_PATH}");
    Ok(())
}

/// Kills the watchdog and poller processes.
pub fn stop(config: &Config) -> anyhow::Result<()> {
    kill_forks();
    if Path::new(&config.pid_file).exists() {
        std::fs::remove_file(&config.pid_file)
            .with_context(|| format!("failed to remove {}", config.pid_file))?;
    }
    log::info!("lock service stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_with_pid_file(path: &Path) -> Config {
        Config {
            pid_file: path.to_string_lossy().into_owned(),
            ..Config::default()
        }
    }

    fn exited_pid() -> u32 {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn own_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn reaped_child_is_not_alive() {
        assert!(!is_alive(exited_pid()));
    }

    #[test]
    fn live_pid_in_file_reports_running() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.pid");
        let config = config_with_pid_file(&path);

        assert_eq!(running_pid(&config), None);
        std::fs::write(&path, std::process::id().to_string()).unwrap();
        assert_eq!(running_pid(&config), Some(std::process::id()));
    }

    #[test]
    fn garbage_pid_file_is_not_running() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.pid");
        std::fs::write(&path, "not a pid").unwrap();

        assert_eq!(running_pid(&config_with_pid_file(&path)), None);
    }

    #[test]
    fn second_claim_while_first_is_starting_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.pid");

        let first = claim_pid_file(&path).unwrap();
        assert!(first.is_some());
        assert!(claim_pid_file(&path).unwrap().is_none());
    }

    #[test]
    fn claim_fails_while_recorded_process_lives() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.pid");
        std::fs::write(&path, std::process::id().to_string()).unwrap();

        assert!(claim_pid_file(&path).unwrap().is_none());
        assert_eq!(read_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn stale_pid_file_is_reclaimed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.pid");
        std::fs::write(&path, exited_pid().to_string()).unwrap();

        let mut file = claim_pid_file(&path).unwrap().expect("stale file should be reclaimed");
        write!(file, "42").unwrap();
        assert_eq!(read_pid(&path), Some(42));
    }

    #[test]
    fn poller_is_respawned_every_time_it_exits() {
        let mut spawned = 0;
        let mut rounds = 0;

        supervise(
            || {
                spawned += 1;
                Ok(Command::new("sh").args(["-c", "exit 0"]).spawn()?)
            },
            || {
                rounds += 1;
                rounds <= 3
            },
            Duration::from_millis(300),
        )
        .unwrap();

        assert_eq!(spawned, 4);
    }

    #[test]
    fn running_poller_is_left_alone() {
        let mut spawned = 0;
        let mut rounds = 0;
        let mut pid = None;

        supervise(
            || {
                spawned += 1;
                let child = Command::new("sleep").arg("30").spawn()?;
                pid = Some(child.id());
                Ok(child)
            },
            || {
                rounds += 1;
                rounds <= 2
            },
            Duration::from_millis(50),
        )
        .unwrap();

        assert_eq!(spawned, 1);
        // stopping the watchdog takes its poller down and reaps it
        assert!(!is_alive(pid.unwrap()));
    }

    #[test]
    fn failed_respawn_is_retried_next_round() {
        let mut spawned = 0;
        let mut rounds = 0;

        supervise(
            || {
                spawned += 1;
                if spawned == 2 {
                    anyhow::bail!("copy failed");
                }
                Ok(Command::new("sh").args(["-c", "exit 0"]).spawn()?)
            },
            || {
                rounds += 1;
                rounds <= 2
            },
            Duration::from_millis(300),
        )
        .unwrap();

        assert_eq!(spawned, 3);
    }
}
