//! Filters streamed tokens so structured tool-call text never reaches the user

/// Decides, chunk by chunk, whether streamed output is user-facing prose.
///
/// Output that opens with `{`, `[` or a code fence is treated as structured
/// data and suppressed for the rest of the reply. A leading run of backticks
/// is held back until it is clear whether it opens a fence. Prose that later
/// turns into a JSON object or a fence is cut off from that chunk on.
#[derive(Debug, Default)]
pub struct PartialFilter {
    seen: String,
    held: String,
    suppressed: bool,
}

impl PartialFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the text to forward, if any
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        if self.suppressed {
            return None;
        }
        self.seen.push_str(chunk);
        self.held.push_str(chunk);

        let head = self.seen.trim_start();
        if head.starts_with('{') || head.starts_with('[') || head.starts_with("```") {
            return self.suppress();
        }
        if head.is_empty() || "```".starts_with(head) {
            return None;
        }
        if self.seen.contains("{\"") || self.seen.contains("```") {
            return self.suppress();
        }

        Some(std::mem::take(&mut self.held))
    }

    fn suppress(&mut self) -> Option<String> {
        self.suppressed = true;
        self.held.clear();
        None
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }
}
