use rgpurge_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TeardownError {
    #[error("Resource group not found: {0}")]
    ContainerNotFound(String),

    #[error("Invalid teardown options: {0}")]
    InvalidOptions(String),

    #[error("Teardown cancelled by operator")]
    Cancelled,

    #[error("Control plane error: {0}")]
    Cloud(#[from] CloudError),
}

pub type Result<T> = std::result::Result<T, TeardownError>;
