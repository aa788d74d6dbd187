use anyhow::{bail, Context, Result};
use futures_util::{Stream, StreamExt};
use murmur_shared::{ConversationRequest, EventDecoder, StreamEvent};
use std::collections::VecDeque;
use tracing::{debug, info};

const NDJSON: &str = "application/x-ndjson";

pub struct BackendClient {
    http: reqwest::Client,
    chat_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            chat_url: format!("{}/api/chat", base_url.trim_end_matches('/')),
        }
    }

    /// Posts the full history and yields events as their records arrive.
    /// Dropping the stream closes the connection, which cancels the call
    /// on the server.
    pub async fn stream_chat(
        &self,
        request: &ConversationRequest,
    ) -> Result<impl Stream<Item = Result<StreamEvent>>> {
        info!("Sending {} messages to {}", request.len(), self.chat_url);
        let response = self
            .http
            .post(&self.chat_url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.chat_url))?;

        let status = response.status();
        let is_ndjson = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(NDJSON));
        if !is_ndjson {
            bail!("Server returned {} without an event stream", status);
        }
        debug!("Server answered {}", status);

        let state = DecodeState {
            body: Box::pin(response.bytes_stream()),
            decoder: Some(EventDecoder::new()),
            ready: VecDeque::new(),
        };
        Ok(futures_util::stream::unfold(state, |mut state| async move {
            let item = state.next_event().await?;
            Some((item, state))
        }))
    }
}

struct DecodeState<S> {
    body: S,
    decoder: Option<EventDecoder>,
    ready: VecDeque<StreamEvent>,
}

impl<S, B> DecodeState<S>
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    async fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(Ok(event));
            }
            let decoder = self.decoder.as_mut()?;

            match self.body.next().await {
                Some(Ok(chunk)) => match decoder.push(chunk.as_ref()) {
                    Ok(events) => self.ready.extend(events),
                    Err(e) => {
                        self.decoder = None;
                        return Some(Err(e.into()));
                    }
                },
                Some(Err(e)) => {
                    self.decoder = None;
                    return Some(Err(anyhow::Error::new(e).context("Connection to server lost")));
                }
                None => {
                    let decoder = self.decoder.take()?;
                    match decoder.finish() {
                        Ok(Some(event)) => self.ready.push_back(event),
                        Ok(None) => return None,
                        Err(e) => return Some(Err(e.into())),
                    }
                }
            }
        }
    }
}
