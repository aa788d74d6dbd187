use anyhow::Result;
use std::future::Future;
use tokio::io::{AsyncBufRead, Lines};

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Clear,
    Quit,
    /// Ctrl-C at the prompt.
    Interrupted,
    Empty,
}

/// Reads one prompt line, giving up as soon as `interrupt` resolves.
pub async fn next_input<R, F>(lines: &mut Lines<R>, interrupt: F) -> Result<Input>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    let line = tokio::select! {
        line = lines.next_line() => line?,
        _ = interrupt => return Ok(Input::Interrupted),
    };

    let Some(line) = line else {
        return Ok(Input::Quit);
    };
    Ok(match line.trim() {
        "" => Input::Empty,
        "/quit" => Input::Quit,
        "/clear" => Input::Clear,
        text => Input::Message(text.to_string()),
    })
}
