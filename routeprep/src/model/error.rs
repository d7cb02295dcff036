use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),
    #[error("failure reading PBF {path}: {source}")]
    PbfReadError { path: String, source: anyhow::Error },
    #[error("failure writing PBF {path}: {source}")]
    PbfWriteError { path: String, source: anyhow::Error },
    #[error("failure accessing {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid tag removal pattern '{0}': {1}")]
    InvalidRemovalPattern(String, regex::Error),
    #[error("unknown location index type '{0}'")]
    UnknownIndexType(String),
    #[error(transparent)]
    AreaError(#[from] routeprep_area::AreaError),
    #[error("tile download failed: {0}")]
    DownloadError(String),
    #[error("{0}")]
    InternalError(String),
}
