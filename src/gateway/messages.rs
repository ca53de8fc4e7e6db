use serde_json::{Map, Value};

/// Reply fields, in priority order, that carry the agent's message
const REPLY_FIELDS: [&str; 4] = ["output", "message", "text", "response"];

/// Instruction decoded from one agent reply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteResponse {
    /// `Some(true)` asks to start a call, `Some(false)` forces cleanup
    pub call: Option<bool>,
    /// Playable clip source
    pub audio: Option<String>,
    pub signal: Option<Signal>,
    /// How the body was interpreted
    pub shape: ReplyShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// End the call once the accompanying clip finished
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyShape {
    /// A JSON object (possibly the first element of an array)
    #[default]
    Object,
    /// Valid JSON that is not an object
    NotAnObject,
    /// Not JSON at all (plain text, transport error)
    Unparseable,
}

impl RemoteResponse {
    /// Decode a reply body.
    ///
    /// Arrays contribute their first element. Anything that is not an object
    /// decodes to an empty acknowledgment.
    pub fn decode(body: &str) -> Self {
        let value = match serde_json::from_str::<Value>(body.trim()) {
            Ok(value) => value,
            Err(_) => return Self::acknowledgment(ReplyShape::Unparseable),
        };

        let value = match value {
            Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
            other => other,
        };

        match value {
            Value::Object(map) => Self::from_object(&map),
            _ => Self::acknowledgment(ReplyShape::NotAnObject),
        }
    }

    pub fn acknowledgment(shape: ReplyShape) -> Self {
        Self {
            shape,
            ..Self::default()
        }
    }

    fn from_object(map: &Map<String, Value>) -> Self {
        let call = map.get("call").and_then(Value::as_bool);

        let audio = map
            .get("audio")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let signal = match map.get("signal").and_then(Value::as_str) {
            Some("end") => Some(Signal::End),
            _ => None,
        };

        Self {
            call,
            audio,
            signal,
            shape: ReplyShape::Object,
        }
    }

    /// End the call after the clip finished playing
    pub fn ends_after_playback(&self) -> bool {
        self.signal == Some(Signal::End)
    }

    /// Neither a call instruction nor a clip
    pub fn is_acknowledgment(&self) -> bool {
        self.call.is_none() && self.audio.is_none()
    }
}

/// Unwrap an automation webhook body into the agent's reply content.
///
/// The first truthy field among `output`, `message`, `text` and `response`
/// wins; a JSON string is used as-is; other JSON is re-serialized; non-JSON
/// text is returned verbatim.
pub fn extract_reply_content(body: &str) -> String {
    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(_) => return body.to_string(),
    };

    if let Value::Object(map) = &value {
        for field in REPLY_FIELDS {
            match map.get(field) {
                Some(Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(other) if is_truthy(other) => return other.to_string(),
                _ => {}
            }
        }
    }

    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
