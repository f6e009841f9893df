//! Azure error types and classification
//!
//! The az CLI reports ARM failures on stderr as
//! `ERROR: (Code) message` followed by `Code: ...` / `Message: ...` lines, and
//! `az rest` embeds the raw JSON error body. Classification extracts the ARM
//! error code and maps it onto the [`CallOutcome`] taxonomy.

use rgpurge_cloud::CallOutcome;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AzureError {
    #[error("az CLI not found. Please install: https://aka.ms/installazurecli")]
    AzNotFound,

    #[error("az CLI is not logged in: {0}")]
    NotLoggedIn(String),

    #[error("az command failed: {message}")]
    CommandFailed {
        code: Option<String>,
        message: String,
    },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AzureError {
    /// Build a command failure from raw stderr
    pub fn from_stderr(stderr: &str) -> Self {
        AzureError::CommandFailed {
            code: extract_error_code(stderr),
            message: stderr.trim().to_string(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            AzureError::CommandFailed { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code().is_some_and(|c| NOT_FOUND_CODES.contains(&c))
    }

    /// Map onto the mutation outcome taxonomy
    pub fn to_outcome(&self) -> CallOutcome {
        match self {
            AzureError::CommandFailed { code, message } => classify(code.as_deref(), message),
            AzureError::AzNotFound | AzureError::NotLoggedIn(_) => {
                CallOutcome::permission(self.to_string())
            }
            AzureError::IoError(_) => CallOutcome::transient(self.to_string()),
            AzureError::JsonError(_) => CallOutcome::rejected(self.to_string()),
        }
    }
}

impl From<AzureError> for rgpurge_cloud::CloudError {
    fn from(e: AzureError) -> Self {
        match e {
            AzureError::AzNotFound | AzureError::NotLoggedIn(_) => {
                rgpurge_cloud::CloudError::AuthenticationFailed(e.to_string())
            }
            AzureError::JsonError(json) => rgpurge_cloud::CloudError::Json(json),
            AzureError::IoError(io) => rgpurge_cloud::CloudError::Io(io),
            AzureError::CommandFailed { .. } => {
                rgpurge_cloud::CloudError::CommandFailed(e.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AzureError>;

/// ARM codes meaning the target is already gone
const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFound",
    "ResourceGroupNotFound",
    "NotFound",
    "ParentResourceNotFound",
];

/// ARM codes worth retrying with backoff
const TRANSIENT_CODES: &[&str] = &[
    "TooManyRequests",
    "RetryableError",
    "AnotherOperationInProgress",
    "InternalServerError",
    "ServiceUnavailable",
    "GatewayTimeout",
    "OperationPreempted",
    "ReferencedResourceNotProvisioned",
    "CanceledAndSupersededDueToAnotherOperation",
];

/// ARM codes meaning another live object still holds the target
const DEPENDENCY_CODES: &[&str] = &[
    "InUseSubnetCannotBeDeleted",
    "InUseNetworkSecurityGroupCannotBeDeleted",
    "InUseRouteTableCannotBeDeleted",
    "NicInUse",
    "SubnetHasServiceAssociationLink",
    "SubnetMissingRequiredDelegation",
];

/// ARM codes for authorization, lock and policy denials
const PERMISSION_CODES: &[&str] = &[
    "AuthorizationFailed",
    "LinkedAuthorizationFailed",
    "ScopeLocked",
    "RequestDisallowedByPolicy",
    "Forbidden",
];

/// Classify an ARM error code (and message, for code-less failures)
pub fn classify(code: Option<&str>, message: &str) -> CallOutcome {
    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => CallOutcome::NotFound,
        Some(c) if TRANSIENT_CODES.contains(&c) => CallOutcome::transient(message),
        Some(c) if DEPENDENCY_CODES.contains(&c) => CallOutcome::dependency(message),
        Some(c) if PERMISSION_CODES.contains(&c) => CallOutcome::permission(message),
        Some(_) => CallOutcome::rejected(message),
        None if message.contains("timed out") || message.contains("Connection reset") => {
            CallOutcome::transient(message)
        }
        None => CallOutcome::rejected(message),
    }
}

/// Extract the ARM error code from az CLI stderr
pub fn extract_error_code(stderr: &str) -> Option<String> {
    // `Code: InUseSubnetCannotBeDeleted`
    for line in stderr.lines() {
        if let Some(code) = line.trim().strip_prefix("Code:") {
            let code = code.trim();
            if !code.is_empty() {
                return Some(code.to_string());
            }
        }
    }

    // `ERROR: (ResourceNotFound) The Resource ...`
    if let Some(start) = stderr.find("ERROR: (") {
        let rest = &stderr[start + 8..];
        if let Some(end) = rest.find(')') {
            return Some(rest[..end].to_string());
        }
    }

    // `az rest` JSON body: `{"error":{"code":"ScopeLocked",...`
    if let Some(start) = stderr.find("\"code\":") {
        let rest = stderr[start + 7..].trim_start().trim_start_matches('"');
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    None
}
