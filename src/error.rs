use thiserror::Error;

pub type Result<O> = std::result::Result<O, CovError>;

#[derive(Error, Debug)]
pub enum CovError {
    #[error("io error: '{0}'")]
    IOError(#[from] std::io::Error),

    // Can't use #[from]; winnow's ContextError doesn't implement std::error::Error
    // the way thiserror wants.
    #[error("diff parse error: '{0}'")]
    DiffParseError(String),

    #[error("json error: '{0}'")]
    JsonError(#[from] serde_json::Error),

    #[error("config error: '{0}'")]
    ConfigError(String),

    #[error("worker '{pid}' exited with status {status}: {stderr}")]
    WorkerFailed {
        pid: u32,
        status: i32,
        stderr: String,
    },

    #[error("worker result at '{0}' could not be decoded")]
    WorkerResultCorrupt(String),

    #[error("no such task node: '{0}'")]
    UnknownNode(String),

    #[error("annotator exited non-zero for '{0}'")]
    AnnotatorFailed(String),
}
