//! Newline-delimited JSON framing for [`StreamEvent`]s.
//!
//! The server writes one record per event. Clients feed whatever byte chunks
//! the transport hands them into [`EventDecoder`] and get back every event
//! whose line is complete, so nothing waits on the whole response.

use crate::StreamEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed event record: {source}\nRaw line: {line}")]
    Malformed {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn encode_event(event: &StreamEvent) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, DecodeError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line[..line.len() - 1])? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Decodes a trailing record that was not newline-terminated.
    pub fn finish(self) -> Result<Option<StreamEvent>, DecodeError> {
        decode_line(&self.buffer)
    }
}

fn decode_line(line: &[u8]) -> Result<Option<StreamEvent>, DecodeError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(line)
        .map(Some)
        .map_err(|source| DecodeError::Malformed {
            line: String::from_utf8_lossy(line).into_owned(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn decodes_records_split_across_chunks() {
        let body: String = [
            StreamEvent::text("Hel"),
            StreamEvent::text("lo"),
            StreamEvent::Done,
        ]
        .iter()
        .map(|e| encode_event(e).unwrap())
        .collect();

        let mut decoder = EventDecoder::new();
        let mut events = Vec::new();
        for chunk in body.as_bytes().chunks(7) {
            events.extend(decoder.push(chunk).unwrap());
        }

        assert_eq!(
            events,
            vec![StreamEvent::text("Hel"), StreamEvent::text("lo"), StreamEvent::Done]
        );
        assert!(decoder.finish().unwrap().is_none());
    }

    #[test]
    fn multibyte_text_split_mid_character() {
        let line = encode_event(&StreamEvent::text("héllo ✓")).unwrap();
        let bytes = line.as_bytes();
        let split = line.find('✓').unwrap() + 1;

        let mut decoder = EventDecoder::new();
        assert!(decoder.push(&bytes[..split]).unwrap().is_empty());
        assert_eq!(
            decoder.push(&bytes[split..]).unwrap(),
            vec![StreamEvent::text("héllo ✓")]
        );
    }

    #[test]
    fn trailing_record_without_newline() {
        let mut decoder = EventDecoder::new();
        let line = encode_event(&StreamEvent::error(ErrorKind::Timeout, "deadline", true)).unwrap();
        assert!(decoder.push(line.trim_end().as_bytes()).unwrap().is_empty());
        assert_eq!(
            decoder.finish().unwrap(),
            Some(StreamEvent::error(ErrorKind::Timeout, "deadline", true))
        );
    }

    #[test]
    fn blank_lines_are_skipped_and_garbage_reported() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(b"\r\n\n").unwrap().is_empty());
        assert!(matches!(
            decoder.push(b"not json\n"),
            Err(DecodeError::Malformed { .. })
        ));
    }
}
