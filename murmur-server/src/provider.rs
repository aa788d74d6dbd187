//! The completion provider seam.
//!
//! A provider turns a conversation into a stream of raw events. Dropping the
//! returned stream must release the upstream call.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use murmur_shared::{ConversationRequest, ErrorKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Text(String),
    Finished,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Provider rejected the request: {0}")]
    Rejected(String),

    #[error("Provider stream interrupted: {0}")]
    Interrupted(String),

    #[error("Provider deadline exceeded")]
    Timeout,
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Rejected(_) => ErrorKind::ProviderRejected,
            ProviderError::Interrupted(_) => ErrorKind::UpstreamTerminated,
            ProviderError::Timeout => ErrorKind::Timeout,
        }
    }
}

pub type ProviderStream = BoxStream<'static, Result<ProviderEvent, ProviderError>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn start(&self, request: &ConversationRequest) -> Result<ProviderStream, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_classify_into_relay_kinds() {
        assert_eq!(ProviderError::Rejected("401".into()).kind(), ErrorKind::ProviderRejected);
        assert_eq!(ProviderError::Interrupted("reset".into()).kind(), ErrorKind::UpstreamTerminated);
        assert_eq!(ProviderError::Timeout.kind(), ErrorKind::Timeout);
    }
}
