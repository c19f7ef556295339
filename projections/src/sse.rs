//! Server-sent-event framing.
//!
//! A frame is `event:` plus one `data:` line per payload line, terminated by a blank
//! line. Carriage returns and newlines in the event name are dropped.

use serde::Serialize;

/// Render one frame.
#[must_use]
pub fn frame(event: &str, payload: &str) -> String {
    let event: String = event.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
    let mut out = String::with_capacity(event.len() + payload.len() + 16);
    out.push_str("event: ");
    out.push_str(&event);
    out.push('\n');
    for line in payload.split('\n') {
        out.push_str("data: ");
        out.push_str(line.strip_suffix('\r').unwrap_or(line));
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Serialize `view` to JSON and frame it.
///
/// # Errors
///
/// Returns the serialization error if `view` cannot be encoded.
pub fn json_frame<V: Serialize>(event: &str, view: &V) -> Result<String, serde_json::Error> {
    Ok(frame(event, &serde_json::to_string(view)?))
}

/// A comment frame, used as a keepalive.
#[must_use]
pub fn comment(text: &str) -> String {
    format!(": {}\n\n", text.replace(['\r', '\n'], " "))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn single_line_payload() {
        assert_eq!(
            frame("room_screen", r#"{"state":"no_session"}"#),
            "event: room_screen\ndata: {\"state\":\"no_session\"}\n\n"
        );
    }

    #[test]
    fn multi_line_payload_gets_one_data_line_each() {
        assert_eq!(frame("x", "a\r\nb\nc"), "event: x\ndata: a\ndata: b\ndata: c\n\n");
    }

    #[test]
    fn event_name_cannot_inject_lines() {
        assert_eq!(frame("a\nb", ""), "event: ab\ndata: \n\n");
    }

    #[test]
    fn json_and_comment_frames() {
        let framed = json_frame("board", &serde_json::json!({"tickets": []})).unwrap();
        assert_eq!(framed, "event: board\ndata: {\"tickets\":[]}\n\n");
        assert_eq!(comment("keep\nalive"), ": keep alive\n\n");
    }
}
