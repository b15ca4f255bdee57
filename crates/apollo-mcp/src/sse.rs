/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `None` means the default `message` event type.
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is(&self, name: &str) -> bool {
        self.event.as_deref().unwrap_or("message") == name
    }
}

/// Small SSE decoder for the MCP SSE transport.
///
/// Only `event:` and `data:` fields are kept; each blank-line-delimited block with at
/// least one `data:` line becomes one event. Comments (keep-alives) are skipped.
pub fn decode_sse_events(buf: &str) -> Vec<SseEvent> {
    let mut out = Vec::new();
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in buf.split('\n') {
        let l = line.trim_end_matches('\r');

        if l.is_empty() {
            if !data_lines.is_empty() {
                out.push(SseEvent {
                    event: event.take(),
                    data: data_lines.join("\n"),
                });
                data_lines.clear();
            }
            event = None;
            continue;
        }

        if l.starts_with(':') {
            continue;
        }

        if let Some(rest) = l.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if let Some(rest) = l.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        }
    }

    if !data_lines.is_empty() {
        out.push(SseEvent {
            event,
            data: data_lines.join("\n"),
        });
    }

    out
}

/// Returns `(complete_events, unconsumed_tail)` for an incrementally received buffer.
pub fn split_complete_events(buf: &str) -> (Vec<SseEvent>, &str) {
    let normalized_end = buf.rfind("\n\n").map(|i| i + 2);
    match normalized_end {
        Some(end) => (decode_sse_events(&buf[..end]), &buf[end..]),
        None => (Vec::new(), buf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_events() {
        let s = "event: endpoint\ndata: /messages?sessionId=abc\n\nevent: message\ndata: {\"jsonrpc\":\"2.0\"}\n\n";
        let ev = decode_sse_events(s);
        assert_eq!(ev.len(), 2);
        assert!(ev[0].is("endpoint"));
        assert_eq!(ev[0].data, "/messages?sessionId=abc");
        assert!(ev[1].is("message"));
    }

    #[test]
    fn joins_multiline_data_and_skips_comments() {
        let s = ": keep-alive\n\ndata: a\ndata: b\n\n";
        let ev = decode_sse_events(s);
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].data, "a\nb");
        assert!(ev[0].is("message"));
    }

    #[test]
    fn split_keeps_partial_tail() {
        let (events, tail) = split_complete_events("data: one\n\ndata: tw");
        assert_eq!(events.len(), 1);
        assert_eq!(tail, "data: tw");
    }
}
