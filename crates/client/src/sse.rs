//! Server-Sent Events framing.
//!
//! Lines are fed one at a time; a blank line completes an event. Comment
//! lines (leading `:`), `id:` and `retry:` fields are ignored. Multiple
//! `data:` lines are joined with `\n`.

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `None` means the default `message` event.
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its terminator; a trailing `\r` is tolerated).
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut SseDecoder, text: &str) -> Vec<SseEvent> {
        text.split('\n').filter_map(|l| decoder.push_line(l)).collect()
    }

    #[test]
    fn named_event() {
        let mut decoder = SseDecoder::new();
        let events = feed(&mut decoder, "event: snapshot\ndata: {\"a\":1}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("snapshot".to_string()),
                data: "{\"a\":1}".to_string()
            }]
        );
        assert_eq!(events[0].name(), "snapshot");
    }

    #[test]
    fn comments_and_keepalives_are_ignored() {
        let mut decoder = SseDecoder::new();
        let events = feed(&mut decoder, ":\n\n: keep-alive\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "message");
    }

    #[test]
    fn multi_line_data_and_crlf() {
        let mut decoder = SseDecoder::new();
        let events = feed(&mut decoder, "data: one\r\ndata:two\r\nid: 7\r\n\r\n");
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn event_name_does_not_leak_into_next_event() {
        let mut decoder = SseDecoder::new();
        let events = feed(&mut decoder, "event: snapshot\ndata: 1\n\ndata: 2\n\n");
        assert_eq!(events[1].event, None);
    }
}
