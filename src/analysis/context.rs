use std::collections::VecDeque;

use crate::events::TranscriptSegment;

/// Rolling window of final transcript segments shared by the analyzers.
///
/// Each analyzer task owns its own buffer; segments arrive through its bus
/// subscription in arrival order.
pub struct RollingContext {
    segments: VecDeque<TranscriptSegment>,
    cap: usize,
}

impl RollingContext {
    pub fn new(cap: usize) -> Self {
        Self {
            segments: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, segment: TranscriptSegment) {
        if self.segments.len() >= self.cap {
            self.segments.pop_front();
        }
        self.segments.push_back(segment);
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Text of the most recent `n` segments, one per line.
    pub fn recent_text(&self, n: usize) -> String {
        let skip = self.segments.len().saturating_sub(n);
        self.segments
            .iter()
            .skip(skip)
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Full buffered text, one segment per line.
    pub fn all_text(&self) -> String {
        self.recent_text(self.segments.len())
    }
}
