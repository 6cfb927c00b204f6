//! Credentials carried in call metadata
//!
//! A call is authenticated by two ASCII metadata entries, `auth-uname` and
//! `auth-token`. Either one missing means the call carries no credentials.

use chatter_core::auth::{AUTH_TOKEN_KEY, AUTH_UNAME_KEY};
use chatter_core::Credentials;
use tonic::metadata::errors::InvalidMetadataValue;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::service::Interceptor;
use tonic::{Request, Status};

pub fn has_credentials(metadata: &MetadataMap) -> bool {
    credentials(metadata).is_some()
}

/// Read the credential pair, if both halves are present and readable
pub fn credentials(metadata: &MetadataMap) -> Option<Credentials> {
    let read = |key: &'static str| metadata.get(key).and_then(|v| v.to_str().ok());
    Credentials::from_parts(read(AUTH_UNAME_KEY), read(AUTH_TOKEN_KEY))
}

pub fn attach(metadata: &mut MetadataMap, credentials: &Credentials) -> Result<(), InvalidMetadataValue> {
    metadata.insert(AUTH_UNAME_KEY, credentials.username.parse()?);
    metadata.insert(AUTH_TOKEN_KEY, credentials.token.parse()?);
    Ok(())
}

/// Client-side interceptor that attaches the same credentials to every call
#[derive(Clone, Default)]
pub struct CredentialCarrier {
    pair: Option<(AsciiMetadataValue, AsciiMetadataValue)>,
}

impl CredentialCarrier {
    pub fn new(credentials: Option<&Credentials>) -> Result<Self, InvalidMetadataValue> {
        let pair = match credentials {
            Some(c) => Some((c.username.parse()?, c.token.parse()?)),
            None => None,
        };
        Ok(Self { pair })
    }

    /// Carrier that sends nothing
    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl Interceptor for CredentialCarrier {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some((uname, token)) = &self.pair {
            let metadata = request.metadata_mut();
            metadata.insert(AUTH_UNAME_KEY, uname.clone());
            metadata.insert(AUTH_TOKEN_KEY, token.clone());
        }
        Ok(request)
    }
}
