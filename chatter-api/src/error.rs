use chatter_core::intercept::RejectionKind;
use chatter_core::{AuthError, RegistryError, Rejection, StoreError};
use thiserror::Error;
use tonic::{Code, Status};
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Rejected(#[from] Rejection),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A status produced by the transport itself, e.g. a broken inbound stream
    #[error("{0}")]
    Transport(#[from] Status),
}

pub type ApiResult<T> = Result<T, ApiError>;

fn store_status(err: StoreError) -> Status {
    match err {
        StoreError::NotFound(what) => Status::new(Code::InvalidArgument, what),
        StoreError::Conflict(what) => Status::new(Code::AlreadyExists, what),
        other => {
            error!(error = %other, "Store operation failed");
            Status::new(Code::Internal, "Internal storage error")
        }
    }
}

impl From<ApiError> for Status {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::InvalidArgument(msg) => Status::new(Code::InvalidArgument, msg),
            ApiError::Store(e) => store_status(e),
            ApiError::Registry(RegistryError::NotFound(id)) => {
                Status::new(Code::InvalidArgument, format!("Channel {} does not exist", id))
            }
            ApiError::Registry(RegistryError::Store(e)) => store_status(e),
            ApiError::Auth(AuthError::Store(e)) => {
                error!(error = %e, "Credential lookup failed");
                Status::new(Code::Internal, "Internal storage error")
            }
            ApiError::Auth(e) => Status::new(Code::Unauthenticated, e.to_string()),
            ApiError::Rejected(rejection) => match rejection.kind {
                RejectionKind::Banned => Status::new(Code::Unauthenticated, rejection.reason),
                RejectionKind::PolicyUnavailable => Status::new(Code::Internal, rejection.reason),
            },
            ApiError::Join(e) => {
                error!(error = %e, "Blocking task failed");
                Status::new(Code::Internal, "Internal error")
            }
            ApiError::Transport(status) => status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatter_core::ChannelId;

    fn to_status(err: impl Into<ApiError>) -> Status {
        Status::from(err.into())
    }

    #[test]
    fn test_auth_messages_are_distinct() {
        let cases = [
            (AuthError::MissingCredentials, "No credentials attached to the channel"),
            (AuthError::UnknownUser, "Invalid user"),
            (AuthError::InvalidToken, "Invalid credential"),
            (AuthError::InsufficientRole, "Invalid permission"),
        ];
        for (err, message) in cases {
            let status = to_status(err);
            assert_eq!(status.code(), Code::Unauthenticated);
            assert_eq!(status.message(), message);
        }
    }

    #[test]
    fn test_store_failures_are_internal_and_generic() {
        let status = to_status(AuthError::Store(StoreError::Poisoned));
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "Internal storage error");

        let status = to_status(StoreError::Poisoned);
        assert_eq!(status.code(), Code::Internal);
    }

    #[test]
    fn test_missing_rows_are_invalid_argument() {
        assert_eq!(to_status(RegistryError::NotFound(ChannelId(999))).code(), Code::InvalidArgument);
        assert_eq!(
            to_status(StoreError::NotFound("channel 999".into())).code(),
            Code::InvalidArgument
        );
        assert_eq!(to_status(StoreError::Conflict("uname".into())).code(), Code::AlreadyExists);
    }

    #[test]
    fn test_rejections() {
        let status = to_status(Rejection::banned("ip-ban", "Address is banned"));
        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "Address is banned");

        let status = to_status(Rejection::policy_unavailable("ip-ban"));
        assert_eq!(status.code(), Code::Internal);
    }
}
