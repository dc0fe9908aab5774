use hyperv_api::ApiError;
use thiserror::Error;
use tonic::Code;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("missing cmdlet")]
    MissingCmdlet,

    #[error("unsupported value for argument '{0}'")]
    UnsupportedValue(String),

    #[error("{name}: {source}")]
    Build {
        name: String,
        #[source]
        source: Box<ShellError>,
    },

    #[error("{message}")]
    Runner {
        message: String,
        stderr: String,
        code: Code,
    },

    #[error("cannot decode shell output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shell is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ShellError>;

impl From<ShellError> for ApiError {
    fn from(err: ShellError) -> Self {
        match err {
            ShellError::Runner { code, .. } => ApiError::new(code, err.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}
