//! Streaming relay between a caller and a [`CompletionProvider`].
//!
//! Each call runs as its own tokio task:
//! `Idle -> AwaitingProvider -> Streaming -> {Completed | Failed | Cancelled}`.
//! The task owns the upstream provider stream, so every exit path drops it and
//! releases the provider connection. Events reach the caller through a bounded
//! channel in arrival order, and the caller always sees exactly one terminal
//! event.

use crate::provider::{CompletionProvider, ProviderEvent};
use futures_util::{Stream, StreamExt};
use murmur_shared::{ConversationRequest, ErrorKind, StreamEvent};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    AwaitingProvider,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone)]
pub struct StreamingRelay {
    provider: Arc<dyn CompletionProvider>,
    channel_capacity: usize,
}

impl StreamingRelay {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            channel_capacity: crate::config::DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Starts relaying `request`. Cancelling `cancel` or dropping the returned
    /// stream stops the call.
    pub fn relay(&self, request: ConversationRequest, cancel: &CancellationToken) -> RelayStream {
        let token = cancel.child_token();
        let started = Arc::new(AtomicBool::new(false));

        if let Err(event) = request.validate() {
            warn!("Rejecting relay request: {:?}", event);
            return RelayStream {
                rx: None,
                pending: Some(event),
                cancel: token.clone(),
                started,
                finished: false,
                _guard: token.drop_guard(),
            };
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        tokio::spawn(run_relay(
            self.provider.clone(),
            request,
            tx,
            token.clone(),
            started.clone(),
        ));

        RelayStream {
            rx: Some(rx),
            pending: None,
            cancel: token.clone(),
            started,
            finished: false,
            _guard: token.drop_guard(),
        }
    }
}

pub fn relay(
    request: ConversationRequest,
    provider: Arc<dyn CompletionProvider>,
    cancel: &CancellationToken,
) -> RelayStream {
    StreamingRelay::new(provider).relay(request, cancel)
}

/// Caller side of a relay call.
pub struct RelayStream {
    rx: Option<mpsc::Receiver<StreamEvent>>,
    pending: Option<StreamEvent>,
    cancel: CancellationToken,
    started: Arc<AtomicBool>,
    finished: bool,
    _guard: DropGuard,
}

impl RelayStream {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn terminate(&mut self, event: StreamEvent) -> Poll<Option<StreamEvent>> {
        self.finished = true;
        self.rx = None;
        Poll::Ready(Some(event))
    }

    fn cancelled_event(&self) -> StreamEvent {
        StreamEvent::error(
            ErrorKind::Cancelled,
            "relay cancelled",
            self.started.load(Ordering::Acquire),
        )
    }
}

impl Stream for RelayStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if let Some(event) = this.pending.take() {
            return this.terminate(event);
        }
        // Anything still buffered after a cancel is dropped.
        if this.cancel.is_cancelled() {
            let event = this.cancelled_event();
            return this.terminate(event);
        }

        let Some(rx) = this.rx.as_mut() else {
            this.finished = true;
            return Poll::Ready(None);
        };
        match rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    this.terminate(event)
                } else {
                    Poll::Ready(Some(event))
                }
            }
            Poll::Ready(None) => {
                let event = if this.cancel.is_cancelled() {
                    this.cancelled_event()
                } else {
                    StreamEvent::error(
                        ErrorKind::UpstreamTerminated,
                        "relay task ended without a terminal event",
                        this.started.load(Ordering::Acquire),
                    )
                };
                this.terminate(event)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

async fn run_relay(
    provider: Arc<dyn CompletionProvider>,
    request: ConversationRequest,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    started: Arc<AtomicBool>,
) {
    info!(
        "Relaying {} messages to provider {}",
        request.len(),
        provider.name()
    );

    let state = drive(provider.as_ref(), &request, &tx, &cancel, &started).await;
    match state {
        RelayState::Completed => info!("Relay completed"),
        RelayState::Cancelled => debug!("Relay cancelled"),
        RelayState::Failed => warn!("Relay failed"),
        other => warn!("Relay stopped in unexpected state {:?}", other),
    }
}

async fn drive(
    provider: &dyn CompletionProvider,
    request: &ConversationRequest,
    tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    started: &AtomicBool,
) -> RelayState {
    let mut state = RelayState::Idle;
    transition(&mut state, RelayState::AwaitingProvider);

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return RelayState::Cancelled,
        opened = provider.start(request) => opened,
    };

    let mut upstream = match opened {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!("Provider {} failed to start: {}", provider.name(), e);
            let event = StreamEvent::error(e.kind(), e.to_string(), false);
            return finish(event, tx, cancel, RelayState::Failed).await;
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return RelayState::Cancelled,
            next = upstream.next() => next,
        };

        // An error as the first item means nothing was produced.
        if state == RelayState::AwaitingProvider && matches!(next, Some(Ok(_))) {
            started.store(true, Ordering::Release);
            transition(&mut state, RelayState::Streaming);
        }

        let (event, outcome) = match next {
            Some(Ok(ProviderEvent::Text(delta))) => (StreamEvent::text(delta), None),
            Some(Ok(ProviderEvent::Finished)) => (StreamEvent::Done, Some(RelayState::Completed)),
            Some(Err(e)) => {
                warn!("Provider {} reported an error: {}", provider.name(), e);
                (
                    StreamEvent::error(e.kind(), e.to_string(), state == RelayState::Streaming),
                    Some(RelayState::Failed),
                )
            }
            None => {
                warn!("Provider {} stream ended without completion", provider.name());
                (
                    StreamEvent::error(
                        ErrorKind::UpstreamTerminated,
                        "provider stream ended without a completion signal",
                        state == RelayState::Streaming,
                    ),
                    Some(RelayState::Failed),
                )
            }
        };

        match outcome {
            Some(terminal) => {
                // Release the provider before the caller sees the terminal event.
                drop(upstream);
                return finish(event, tx, cancel, terminal).await;
            }
            None => {
                if !emit(event, tx, cancel).await {
                    return RelayState::Cancelled;
                }
            }
        }
    }
}

fn transition(state: &mut RelayState, next: RelayState) {
    debug!("Relay state {:?} -> {:?}", state, next);
    *state = next;
}

async fn finish(
    event: StreamEvent,
    tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    terminal: RelayState,
) -> RelayState {
    if emit(event, tx, cancel).await {
        debug!("Relay state -> {:?}", terminal);
        terminal
    } else {
        RelayState::Cancelled
    }
}

/// Sends one event, giving up if the caller cancels or goes away.
async fn emit(event: StreamEvent, tx: &mpsc::Sender<StreamEvent>, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}
