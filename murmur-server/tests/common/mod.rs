#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::StreamExt;
use murmur_server::{CompletionProvider, ProviderError, ProviderEvent, ProviderStream};
use murmur_shared::ConversationRequest;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type Upstream = mpsc::UnboundedSender<Result<ProviderEvent, ProviderError>>;

pub struct ScriptedProvider {
    script: Vec<Result<ProviderEvent, ProviderError>>,
    pub starts: AtomicUsize,
    pub seen: Mutex<Option<ConversationRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ProviderEvent, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script,
            starts: AtomicUsize::new(0),
            seen: Mutex::new(None),
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start(&self, request: &ConversationRequest) -> Result<ProviderStream, ProviderError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.seen.lock().unwrap() = Some(request.clone());
        Ok(futures_util::stream::iter(self.script.clone()).boxed())
    }
}

/// Provider whose upstream events are pushed by the test.
pub struct ChannelProvider {
    upstream: Mutex<Option<mpsc::UnboundedReceiver<Result<ProviderEvent, ProviderError>>>>,
    pub starts: AtomicUsize,
}

impl ChannelProvider {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

pub fn channel_provider() -> (Arc<ChannelProvider>, Upstream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let provider = Arc::new(ChannelProvider {
        upstream: Mutex::new(Some(rx)),
        starts: AtomicUsize::new(0),
    });
    (provider, tx)
}

#[async_trait]
impl CompletionProvider for ChannelProvider {
    fn name(&self) -> &str {
        "channel"
    }

    async fn start(&self, _request: &ConversationRequest) -> Result<ProviderStream, ProviderError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .upstream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ProviderError::Rejected("already started".into()))?;
        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

pub fn text(s: &str) -> Result<ProviderEvent, ProviderError> {
    Ok(ProviderEvent::Text(s.to_string()))
}
