use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;

/// Structured reply of a service command.
///
/// An empty reply is indeterminate: the script printed nothing usable, or
/// the dispatcher could not stage inputs or reach the control node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ServiceReply(Map<String, Value>);

impl ServiceReply {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_indeterminate(&self) -> bool {
        self.0.is_empty()
    }

    /// The conventional `success` flag, when the script reported one.
    pub fn success(&self) -> Option<bool> {
        self.0.get("success").and_then(Value::as_bool)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for ServiceReply {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Extract the JSON object a service script printed.
///
/// Scripts may print log noise around their reply, so the candidate is the
/// text between the first `{` and the last `}`. Raw newlines, carriage
/// returns and tabs inside string literals are escaped before decoding.
/// Anything that still fails to decode as an object yields an empty reply.
pub fn parse_reply(stdout: &str) -> ServiceReply {
    let Some(start) = stdout.find('{') else {
        return ServiceReply::empty();
    };
    let Some(end) = stdout.rfind('}') else {
        return ServiceReply::empty();
    };
    if end < start {
        return ServiceReply::empty();
    }

    let candidate = escape_string_controls(&stdout[start..=end]);
    match serde_json::from_str::<Value>(&candidate) {
        Ok(Value::Object(map)) => ServiceReply(map),
        Ok(_) => ServiceReply::empty(),
        Err(err) => {
            debug!(error = %err, "service output holds no decodable reply");
            ServiceReply::empty()
        }
    }
}

fn escape_string_controls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }

        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}
