use std::process::Command;

use crate::error::AppLockError;

/// Runs `cmd` through `sh -c` and returns stdout. A non-zero exit is an error.
pub fn shell_exec(cmd: &str) -> Result<String, AppLockError> {
    let mut command = Command::new("sh");
    command.arg("-c").arg(cmd);
    run(command, cmd)
}

/// Runs `program` directly with `args`, so arguments never pass through the shell.
pub fn exec<I, S>(program: &str, args: I) -> Result<String, AppLockError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();
    let display = std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");

    let mut command = Command::new(program);
    command.args(&args);
    run(command, &display)
}

/// Runs `cmd` through `sh -c` and returns stderr regardless of the exit status.
pub fn shell_exec_stderr(cmd: &str) -> Result<String, AppLockError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .map_err(|source| AppLockError::Spawn {
            cmd: cmd.to_string(),
            source,
        })?;

    Ok(String::from_utf8_lossy(&output.stderr).into_owned())
}

fn run(mut command: Command, display: &str) -> Result<String, AppLockError> {
    let output = command.output().map_err(|source| AppLockError::Spawn {
        cmd: display.to_string(),
        source,
    })?;

    if !output.status.success() {
        return Err(AppLockError::CommandFailed {
            cmd: display.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
