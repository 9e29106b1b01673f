//! Framing: ASCII `KEY: VALUE` lines terminated by a blank line.

/// A whole frame must fit in one UDP datagram.
pub const MAX_FRAME_LEN: usize = 8 * 1024;

/// Unordered on the wire, but insertion order is preserved so that
/// `decode_frame(encode_frame(m))` reproduces `m` exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireMap {
    pairs: Vec<(String, String)>,
}

impl WireMap {
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Append a pair. Last write wins on lookup for duplicate keys.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The mandatory TYPE field.
    pub fn type_name(&self) -> Option<&str> {
        self.get("TYPE")
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Encode failure: the datagram cap is the only way encoding can go wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame too large for one datagram ({0} bytes)")]
pub struct FrameTooLarge(pub usize);

/// Encode a map into one frame: `KEY: VALUE` per line, blank line terminator.
pub fn encode_frame(map: &WireMap) -> Result<Vec<u8>, FrameTooLarge> {
    let mut out = String::new();
    for (k, v) in map.pairs() {
        out.push_str(k);
        out.push_str(": ");
        out.push_str(v);
        out.push('\n');
    }
    out.push('\n');
    if out.len() > MAX_FRAME_LEN {
        return Err(FrameTooLarge(out.len()));
    }
    Ok(out.into_bytes())
}

/// Decode one frame. Lines after the blank terminator are ignored; a frame
/// whose trailing blank line was stripped in transit still parses.
pub fn decode_frame(bytes: &[u8]) -> Result<WireMap, WireError> {
    let text = std::str::from_utf8(bytes).map_err(|_| WireError::MalformedFrame)?;
    let mut map = WireMap::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        let (key, value) = line.split_once(':').ok_or(WireError::MalformedFrame)?;
        map.push(key.trim(), value.trim());
    }
    if map.type_name().is_none() {
        return Err(WireError::MissingField("TYPE"));
    }
    Ok(map)
}

/// Wire-level and field-level decode failures. Network-sourced: the frame is
/// dropped and logged, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("malformed frame")]
    MalformedFrame,
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("invalid value for field {0}")]
    InvalidField(&'static str),
    #[error("unknown message type {0}")]
    UnknownType(String),
}
