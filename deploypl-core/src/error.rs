use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    /// Neither the store nor the seed yielded a single node.
    #[error("empty node pool")]
    EmptyPool,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("corrupt state column: {0}")]
    CorruptState(#[from] deploypl_model::UnknownStateError),

    #[error("seed file {path}: {source}")]
    Seed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("privilege transition failed: {0}")]
    Privilege(String),
}

pub type Result<T> = std::result::Result<T, DeployError>;
