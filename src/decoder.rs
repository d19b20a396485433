//! Line decoder for the status stream
//!
//! Turns raw byte chunks read from the status subprocess into ordered
//! [`StateEvent`]s. Bytes are buffered until a newline completes a record.
//! A line that does not parse becomes one `Unknown`-mapped event and
//! decoding carries on with the next line.

use crate::event::{EventOrigin, StateEvent, StatusRecord};

/// Longest line accepted before it is treated as malformed
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Incremental newline-delimited decoder
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
    /// Set when the current line overflowed and its bytes were dropped
    overflowed: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the events for every line it completed,
    /// in the order the lines appeared.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<StateEvent> {
        let mut events = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.overflowed || self.pending.len() + head.len() > MAX_LINE_BYTES {
                self.overflowed = false;
                self.pending.clear();
                tracing::debug!("Dropping status line longer than {} bytes", MAX_LINE_BYTES);
                events.push(StateEvent::unknown(EventOrigin::Malformed));
                continue;
            }

            let event = if self.pending.is_empty() {
                Self::parse_line(head)
            } else {
                self.pending.extend_from_slice(head);
                let line = std::mem::take(&mut self.pending);
                Self::parse_line(&line)
            };
            events.extend(event);
        }

        if !rest.is_empty() && !self.overflowed {
            if self.pending.len() + rest.len() > MAX_LINE_BYTES {
                self.pending.clear();
                self.overflowed = true;
            } else {
                self.pending.extend_from_slice(rest);
            }
        }

        events
    }

    /// End of stream: a trailing partial line is discarded without an event.
    ///
    /// Returns the number of bytes dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.pending.len();
        if dropped > 0 {
            tracing::debug!("Discarding {} bytes of incomplete status line", dropped);
        }
        self.pending.clear();
        self.overflowed = false;
        dropped
    }

    /// Bytes buffered for the current incomplete line
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Parse one complete line. Blank lines are not records and yield `None`.
    pub fn parse_line(line: &[u8]) -> Option<StateEvent> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }

        match serde_json::from_slice::<StatusRecord>(line) {
            Ok(record) => {
                let event = StateEvent::from_record(record);
                if event.is_unknown() {
                    tracing::debug!("Unrecognized status class, treating as stopped");
                }
                Some(event)
            }
            Err(e) => {
                tracing::debug!(
                    "Malformed status line ({}): {:?}",
                    e,
                    String::from_utf8_lossy(line)
                );
                Some(StateEvent::unknown(EventOrigin::Malformed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StateClass;

    fn classes(events: &[StateEvent]) -> Vec<StateClass> {
        events.iter().map(|e| e.class).collect()
    }

    #[test]
    fn test_decodes_lines_in_order() {
        let mut decoder = LineDecoder::new();
        let events = decoder.decode(
            b"{\"class\":\"idle\"}\n{\"class\":\"recording\"}\n{\"class\":\"transcribing\"}\n",
        );
        assert_eq!(
            classes(&events),
            vec![StateClass::Idle, StateClass::Recording, StateClass::Transcribing]
        );
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.decode(b"{\"class\":\"rec").is_empty());
        assert_eq!(decoder.pending_len(), 13);
        let events = decoder.decode(b"ording\"}\n{\"cla");
        assert_eq!(classes(&events), vec![StateClass::Recording]);
        let events = decoder.decode(b"ss\":\"idle\"}\n");
        assert_eq!(classes(&events), vec![StateClass::Idle]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_malformed_line_yields_one_unknown_and_continues() {
        let mut decoder = LineDecoder::new();
        let events = decoder.decode(b"not-json-at-all\n{\"class\":\"idle\"}\n");
        assert_eq!(events.len(), 2);
        assert!(events[0].is_unknown());
        assert_eq!(events[0].origin, EventOrigin::Malformed);
        assert_eq!(events[0].class, StateClass::Stopped);
        assert_eq!(events[1].class, StateClass::Idle);
        assert!(!events[1].is_unknown());
    }

    #[test]
    fn test_missing_class_is_malformed() {
        let event = LineDecoder::parse_line(br#"{"text":"x"}"#).unwrap();
        assert_eq!(event.origin, EventOrigin::Malformed);
        assert_eq!(event.class, StateClass::Stopped);
    }

    #[test]
    fn test_trailing_partial_line_discarded() {
        let mut decoder = LineDecoder::new();
        let events = decoder.decode(b"{\"class\":\"idle\"}\n{\"class\":\"recor");
        assert_eq!(events.len(), 1);
        assert_eq!(decoder.finish(), 15);
        assert_eq!(decoder.pending_len(), 0);
        // A fresh stream after finish() starts clean
        let events = decoder.decode(b"{\"class\":\"recording\"}\n");
        assert_eq!(classes(&events), vec![StateClass::Recording]);
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let mut decoder = LineDecoder::new();
        let events = decoder.decode(b"\n   \n{\"class\":\"idle\"}\r\n");
        assert_eq!(classes(&events), vec![StateClass::Idle]);
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut decoder = LineDecoder::new();
        let events = decoder.decode(b"\xff\xfe\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].origin, EventOrigin::Malformed);
    }

    #[test]
    fn test_overlong_line_becomes_single_malformed_event() {
        let mut decoder = LineDecoder::new();
        let filler = vec![b'a'; MAX_LINE_BYTES];
        assert!(decoder.decode(&filler).is_empty());
        assert!(decoder.decode(&filler).is_empty());
        assert_eq!(decoder.pending_len(), 0);

        let events = decoder.decode(b"aaa\n{\"class\":\"idle\"}\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].origin, EventOrigin::Malformed);
        assert_eq!(events[1].class, StateClass::Idle);
    }

    fn overlong_idle_record() -> Vec<u8> {
        let mut line = b"{\"class\":\"idle\",\"tooltip\":\"".to_vec();
        line.extend(std::iter::repeat(b'x').take(MAX_LINE_BYTES));
        line.extend_from_slice(b"\"}\n");
        line
    }

    #[test]
    fn test_overlong_valid_record_in_read_sized_chunks_is_malformed() {
        let mut decoder = LineDecoder::new();
        let mut input = overlong_idle_record();
        input.extend_from_slice(b"{\"class\":\"recording\"}\n");

        let mut events = Vec::new();
        for chunk in input.chunks(4096) {
            events.extend(decoder.decode(chunk));
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].origin, EventOrigin::Malformed);
        assert_eq!(events[0].class, StateClass::Stopped);
        assert_eq!(events[1].class, StateClass::Recording);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_overlong_record_completed_in_one_chunk_is_malformed() {
        let mut decoder = LineDecoder::new();
        let events = decoder.decode(&overlong_idle_record());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].origin, EventOrigin::Malformed);
    }

    #[test]
    fn test_overlong_record_with_newline_in_second_chunk_is_malformed() {
        let mut decoder = LineDecoder::new();
        let line = overlong_idle_record();
        let (head, tail) = line.split_at(MAX_LINE_BYTES - 10);
        assert!(decoder.decode(head).is_empty());
        let events = decoder.decode(tail);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].origin, EventOrigin::Malformed);
    }
}
