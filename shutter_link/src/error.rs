use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to launch {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {status}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
    },
}

pub type Result<T> = std::result::Result<T, LinkError>;
