// Incremental decoder for the worker's stdout
// Accepts newline-delimited objects as well as objects written back to back
// without a separator, and tolerates chunks that split an object in two.

use crate::error::TrainerError;
use crate::models::ProgressEvent;

/// Pending bytes kept while waiting for the end of an object
const MAX_PENDING_BYTES: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct ProgressDecoder {
    buffer: Vec<u8>,
}

impl ProgressDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk read from stdout and return every complete value in it.
    /// Malformed values come back as `MalformedProgressChunk`; decoding
    /// resumes after the next newline.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<ProgressEvent, TrainerError>> {
        self.buffer.extend_from_slice(chunk);

        let mut decoded = Vec::new();
        let mut consumed = 0;

        loop {
            let whitespace = self.buffer[consumed..]
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            consumed += whitespace;

            let rest = &self.buffer[consumed..];
            if rest.is_empty() {
                break;
            }

            let mut values = serde_json::Deserializer::from_slice(rest).into_iter::<serde_json::Value>();
            match values.next() {
                Some(Ok(value)) => {
                    consumed += values.byte_offset();
                    decoded.push(to_progress_event(value));
                }
                Some(Err(e)) if e.is_eof() => {
                    if rest.len() > MAX_PENDING_BYTES {
                        decoded.push(Err(malformed(rest, &e.to_string())));
                        consumed += rest.len();
                    }
                    break;
                }
                Some(Err(e)) => {
                    let skip = rest
                        .iter()
                        .position(|b| *b == b'\n')
                        .map_or(rest.len(), |newline| newline + 1);
                    decoded.push(Err(malformed(&rest[..skip], &e.to_string())));
                    consumed += skip;
                }
                None => break,
            }
        }

        self.buffer.drain(..consumed);
        decoded
    }

    /// Flush at end of stream; leftover bytes are an unterminated value
    pub fn finish(&mut self) -> Option<TrainerError> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.iter().all(|b| b.is_ascii_whitespace()) {
            return None;
        }
        Some(malformed(&rest, "unexpected end of output"))
    }
}

/// Progress is a fraction; anything outside `[0, 1]` is rejected
fn to_progress_event(value: serde_json::Value) -> Result<ProgressEvent, TrainerError> {
    let text = value.to_string();
    let event: ProgressEvent = serde_json::from_value(value)
        .map_err(|e| TrainerError::MalformedProgressChunk(format!("{}: {}", text, e)))?;
    if !(0.0..=1.0).contains(&event.progress) {
        return Err(TrainerError::MalformedProgressChunk(format!(
            "{}: progress must be between 0 and 1",
            text
        )));
    }
    Ok(event)
}

fn malformed(bytes: &[u8], reason: &str) -> TrainerError {
    let text = String::from_utf8_lossy(bytes);
    TrainerError::MalformedProgressChunk(format!("{:?}: {}", text.trim(), reason))
}
