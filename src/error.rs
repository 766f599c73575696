use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("torch error: {0}")]
    Tch(#[from] tch::TchError),

    #[error("failed to parse TOML: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("failed to write TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// The two halves of a parallel corpus do not line up.
    #[error("{commands:?} has {command_lines} lines but {rewards:?} has {reward_lines}")]
    LineMismatch {
        commands: PathBuf,
        command_lines: usize,
        rewards: PathBuf,
        reward_lines: usize,
    },

    #[error("reward function {0:?} is not in the command set")]
    UnknownCommand(String),

    #[error("corpus {0} has no pairs")]
    EmptyCorpus(String),

    #[error("no checkpoint found in {0:?}")]
    NoCheckpoint(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}
