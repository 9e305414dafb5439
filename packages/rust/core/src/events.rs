//! Run events and their NDJSON framing.
//!
//! A run reports itself as an ordered sequence of [`StreamEvent`]s. On the
//! wire each event is one JSON object followed by `\n`
//! (`application/x-ndjson`). `complete` or `error` is always the last event
//! of a run.

use prospector_shared::{ProgressSnapshot, ProspectorError, ResolvedEntity, Result, RunStats};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Content type of an event stream.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// One event of a discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status {
        message: String,
    },
    SearchProgress {
        queries_completed: usize,
        total_queries: usize,
        candidates_found: usize,
    },
    SearchComplete {
        total_candidates: usize,
    },
    Match {
        entity: ResolvedEntity,
        progress: ProgressSnapshot,
    },
    Progress {
        progress: ProgressSnapshot,
    },
    Complete {
        stats: RunStats,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// `complete` and `error` end a run; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Serialize one event as an NDJSON frame (JSON + `\n`).
pub fn encode_frame(event: &StreamEvent) -> Result<String> {
    let mut frame = serde_json::to_string(event)
        .map_err(|e| ProspectorError::Transport(format!("failed to encode event: {e}")))?;
    frame.push('\n');
    Ok(frame)
}

/// Incremental NDJSON decoder.
///
/// Network chunks split frames at arbitrary byte offsets (including inside
/// multi-byte UTF-8 sequences), so bytes are buffered until a full line is
/// available. Blank lines are skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(event) = decode_line(&line[..line.len() - 1])? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Flush whatever is left once the stream has ended. A trailing frame
    /// without its newline is still accepted.
    pub fn finish(&mut self) -> Result<Option<StreamEvent>> {
        let rest = std::mem::take(&mut self.buf);
        decode_line(&rest)
    }
}

fn decode_line(line: &[u8]) -> Result<Option<StreamEvent>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(line)
        .map(Some)
        .map_err(|e| ProspectorError::Transport(format!("invalid event frame: {e}")))
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receiver of run events.
///
/// Emitting never fails: a sink whose reader went away drops events and
/// the run carries on.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StreamEvent);
}

/// Discards every event.
pub struct SilentSink;

impl EventSink for SilentSink {
    fn emit(&self, _event: StreamEvent) {}
}

/// Forwards events into an unbounded channel.
pub struct ChannelSink {
    tx: UnboundedSender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<StreamEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: StreamEvent) {
        // A closed receiver means the client disconnected; the run still
        // finishes so every resolution lands in the cache.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ProgressSnapshot {
        ProgressSnapshot {
            processed: 3,
            matched: 1,
            rejected_inactive: 1,
            unresolved: 1,
            ..Default::default()
        }
    }

    #[test]
    fn wire_format_uses_type_tag_and_snake_case() {
        let frame = encode_frame(&StreamEvent::SearchProgress {
            queries_completed: 2,
            total_queries: 6,
            candidates_found: 9,
        })
        .unwrap();
        assert!(frame.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(frame.trim_end()).unwrap();
        assert_eq!(value["type"], "search_progress");
        assert_eq!(value["queries_completed"], 2);
        assert_eq!(value["candidates_found"], 9);

        let frame = encode_frame(&StreamEvent::Progress {
            progress: snapshot(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(frame.trim_end()).unwrap();
        assert_eq!(value["progress"]["rejected_inactive"], 1);
    }

    #[test]
    fn decoder_reassembles_split_frames() {
        let mut stream = String::new();
        stream.push_str(&encode_frame(&StreamEvent::status("Buscando em São Paulo")).unwrap());
        stream.push('\n');
        stream.push_str(&encode_frame(&StreamEvent::SearchComplete { total_candidates: 4 }).unwrap());
        stream.push_str(
            &encode_frame(&StreamEvent::Complete {
                stats: RunStats::default(),
            })
            .unwrap(),
        );
        let bytes = stream.as_bytes();

        // Three-byte chunks split both frames and the "ã" in the middle.
        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        for chunk in bytes.chunks(3) {
            events.extend(decoder.push(chunk).unwrap());
        }
        assert!(decoder.finish().unwrap().is_none());

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::status("Buscando em São Paulo"));
        assert_eq!(events[1], StreamEvent::SearchComplete { total_candidates: 4 });
        assert!(events[2].is_terminal());
    }

    #[test]
    fn decoder_accepts_unterminated_last_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(br#"{"type":"error","message":"boom"}"#).unwrap().is_empty());
        assert_eq!(decoder.finish().unwrap(), Some(StreamEvent::error("boom")));
    }

    #[test]
    fn decoder_rejects_garbage() {
        let mut decoder = FrameDecoder::new();
        let err = decoder.push(b"not json\n").unwrap_err();
        assert!(matches!(err, ProspectorError::Transport(_)));
    }

    #[test]
    fn channel_sink_survives_closed_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        sink.emit(StreamEvent::status("one"));
        drop(rx);
        sink.emit(StreamEvent::status("two"));
    }
}
