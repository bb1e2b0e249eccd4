//! Marked output buffer and display events.

/// Delivered to the display sink, in program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent<'a> {
    /// A fragment just appended to the visible output.
    Partial(&'a str),
    /// The final marked buffer at the end of a run.
    Finished(&'a str),
}

pub type DisplaySink = Box<dyn FnMut(DisplayEvent<'_>) + Send>;

/// The growing marked text of one run.
///
/// While `hidden_depth > 0` appends still land in the buffer (so hidden blocks
/// can be executed and then cut) but are not shown.
#[derive(Default)]
pub struct OutputBuffer {
    text: String,
    hidden_depth: usize,
    sink: Option<DisplaySink>,
}

impl std::fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("text", &self.text)
            .field("hidden_depth", &self.hidden_depth)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl OutputBuffer {
    pub fn new(sink: Option<DisplaySink>) -> Self {
        Self {
            text: String::new(),
            hidden_depth: 0,
            sink,
        }
    }

    pub fn push(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        self.text.push_str(fragment);
        if self.hidden_depth == 0
            && let Some(sink) = self.sink.as_mut()
        {
            sink(DisplayEvent::Partial(fragment));
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Begin a hidden region; returns the length to truncate back to.
    pub fn enter_hidden(&mut self) -> usize {
        self.hidden_depth += 1;
        self.text.len()
    }

    /// End a hidden region, discarding everything appended since `mark`.
    pub fn exit_hidden(&mut self, mark: usize) {
        self.hidden_depth = self.hidden_depth.saturating_sub(1);
        self.text.truncate(mark);
    }

    /// Emit the final event and hand back the text and the sink.
    pub fn finish(mut self) -> (String, Option<DisplaySink>) {
        if let Some(sink) = self.sink.as_mut() {
            sink(DisplayEvent::Finished(&self.text));
        }
        (self.text, self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_sink() -> (DisplaySink, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&seen);
        let sink: DisplaySink = Box::new(move |event| {
            let entry = match event {
                DisplayEvent::Partial(s) => format!("partial:{}", s),
                DisplayEvent::Finished(s) => format!("finished:{}", s),
            };
            writer.lock().unwrap().push(entry);
        });
        (sink, seen)
    }

    #[test]
    fn partial_events_in_order() {
        let (sink, seen) = recording_sink();
        let mut buffer = OutputBuffer::new(Some(sink));
        buffer.push("a");
        buffer.push("");
        buffer.push("b");
        let (text, _) = buffer.finish();

        assert_eq!(text, "ab");
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["partial:a", "partial:b", "finished:ab"]
        );
    }

    #[test]
    fn hidden_region_is_silent_and_truncated() {
        let (sink, seen) = recording_sink();
        let mut buffer = OutputBuffer::new(Some(sink));
        buffer.push("keep ");
        let mark = buffer.enter_hidden();
        buffer.push("secret");
        assert_eq!(buffer.text(), "keep secret");
        buffer.exit_hidden(mark);
        buffer.push("end");

        assert_eq!(buffer.text(), "keep end");
        assert_eq!(*seen.lock().unwrap(), vec!["partial:keep ", "partial:end"]);
    }

    #[test]
    fn works_without_sink() {
        let mut buffer = OutputBuffer::new(None);
        buffer.push("x");
        assert_eq!(buffer.len(), 1);
        assert!(buffer.finish().1.is_none());
    }
}
