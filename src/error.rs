use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppLockError {
    #[error("failed to execute `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{cmd}` exited with {status}: {stderr}")]
    CommandFailed {
        cmd: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("activity {component} failed to start: {message}")]
    LaunchFailed { component: String, message: String },

    #[error("content provider {uri} returned no `{column}` column")]
    MissingColumn { uri: String, column: String },

    #[error("remote request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote returned {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("remote snapshot is not valid json: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("remote stream read failed: {0}")]
    Stream(#[source] std::io::Error),

    #[error("remote listener cancelled by server: {0}")]
    Cancelled(String),

    #[error("remote auth revoked")]
    AuthRevoked,

    #[error("remote database url is not configured")]
    NotConfigured,
}
