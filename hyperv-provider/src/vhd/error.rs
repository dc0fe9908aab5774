use hyperv_api::ApiError;
use thiserror::Error;

use crate::powershell::ShellError;

#[derive(Error, Debug)]
pub enum VhdError {
    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("invalid disk path: {0}")]
    InvalidDiskPath(String),

    #[error("invalid disk id: {0}")]
    InvalidDiskId(String),

    #[error("invalid disk name: {0}")]
    InvalidName(String),

    #[error("invalid next token: {0}")]
    InvalidToken(String),
}

pub type Result<T> = std::result::Result<T, VhdError>;

impl From<VhdError> for ApiError {
    fn from(err: VhdError) -> Self {
        match err {
            VhdError::Shell(e) => e.into(),
            VhdError::Api(e) => e,
            // An id that is not a GUID cannot name an existing disk.
            VhdError::InvalidDiskId(_) => ApiError::not_found(err.to_string()),
            VhdError::InvalidName(_) | VhdError::InvalidToken(_) => {
                ApiError::invalid_argument(err.to_string())
            }
            VhdError::InvalidDiskPath(_) => ApiError::internal(err.to_string()),
        }
    }
}
