//! Incremental parser for the `text/event-stream` bodies returned by
//! streaming chat completion endpoints.

/// A parsed SSE event. Only the fields chat providers actually send are kept.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_empty()
    }
}

/// Feeds raw body chunks, yields completed events.
///
/// Chunks may split lines (and UTF-8 sequences are decoded by the caller),
/// so partial lines stay buffered until their terminator arrives.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    current: SseEvent,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\r', '\n']);
            self.process_line(line, &mut events);
        }

        events
    }

    /// Flush a trailing event when the body ends without a blank line
    pub fn finish(mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let mut ignored = Vec::new();
            self.process_line(line.trim_end_matches(['\r', '\n']), &mut ignored);
        }
        if self.current.is_empty() {
            None
        } else {
            Some(self.current)
        }
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if !self.current.is_empty() {
                events.push(std::mem::take(&mut self.current));
            }
            return;
        }

        // Comment / keep-alive
        if line.starts_with(':') {
            return;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);

        match field {
            "event" => self.current.event = Some(value.to_string()),
            "data" => {
                if !self.current.data.is_empty() {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
            }
            _ => {}
        }
    }
}
