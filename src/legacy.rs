//! Decoder for the legacy gallery meta value.
//!
//! The old gallery type stored its attachment list in PHP `serialize()` form,
//! e.g. `a:2:{i:0;s:2:"11";i:1;i:12;}`. Only the scalar and array subset of
//! that format is understood; objects and references are rejected.
use thiserror::Error;

/// Deepest array nesting accepted; real galleries are a flat list.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LegacyPayloadError {
    #[error("malformed serialized data at byte {0}")]
    Malformed(usize),
    #[error("unsupported serialized type '{0}'")]
    Unsupported(char),
    #[error("payload is a {0}, not a list")]
    NotAList(&'static str),
}

/// A decoded serialized value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<(Value, Value)>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
        }
    }

    /// Integer conversion with PHP `intval` semantics for scalars. Arrays and
    /// null carry no id and yield `None`.
    pub fn as_id(&self) -> Option<i64> {
        match self {
            Value::Null | Value::Array(_) => None,
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::Float(_) => None,
            Value::Str(s) => Some(leading_int(s)),
        }
    }
}

/// Parse the leading integer of `s` the way PHP does: optional whitespace and
/// sign, then as many digits as present. No digits gives zero.
fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }
    if negative {
        -value
    } else {
        value
    }
}

/// Decode the attachment id list stored in the legacy gallery field.
///
/// Values are returned in stored order. Members that carry no positive id are
/// dropped here; callers treat them like attachments without a URL.
pub fn attachment_ids(payload: &str) -> Result<Vec<i64>, LegacyPayloadError> {
    match decode(payload)? {
        Value::Array(entries) => Ok(entries
            .iter()
            .filter_map(|(_, v)| v.as_id())
            .filter(|id| *id > 0)
            .collect()),
        other => Err(LegacyPayloadError::NotAList(other.kind())),
    }
}

/// Decode serialized text into a [`Value`]. Text that does not look
/// serialized at all decodes to a plain string, mirroring how the legacy
/// store reads unserialized meta.
pub fn decode(payload: &str) -> Result<Value, LegacyPayloadError> {
    let trimmed = payload.trim();
    if !looks_serialized(trimmed) {
        return Ok(Value::Str(payload.to_string()));
    }
    let mut parser = Parser {
        bytes: trimmed.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = parser.value()?;
    if parser.pos != parser.bytes.len() {
        return Err(LegacyPayloadError::Malformed(parser.pos));
    }
    Ok(value)
}

fn looks_serialized(s: &str) -> bool {
    if s == "N;" {
        return true;
    }
    let b = s.as_bytes();
    if b.len() < 4 || b[1] != b':' {
        return false;
    }
    matches!(b[0], b'a' | b'b' | b'i' | b'd' | b's' | b'O' | b'C' | b'E')
        && matches!(b[b.len() - 1], b';' | b'}')
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn value(&mut self) -> Result<Value, LegacyPayloadError> {
        let tag = self.next()?;
        if tag == b'N' {
            self.expect(b';')?;
            return Ok(Value::Null);
        }
        self.expect(b':')?;
        match tag {
            b'b' => {
                let raw = self.until(b';')?;
                match raw {
                    "0" => Ok(Value::Bool(false)),
                    "1" => Ok(Value::Bool(true)),
                    _ => Err(self.malformed()),
                }
            }
            b'i' => {
                let raw = self.until(b';')?;
                raw.parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| self.malformed())
            }
            b'd' => {
                let raw = self.until(b';')?;
                parse_float(raw)
                    .map(Value::Float)
                    .ok_or_else(|| self.malformed())
            }
            b's' => {
                let len = self.length(b':')?;
                self.expect(b'"')?;
                let end = self
                    .pos
                    .checked_add(len)
                    .filter(|end| *end <= self.bytes.len())
                    .ok_or_else(|| self.malformed())?;
                let text = std::str::from_utf8(&self.bytes[self.pos..end])
                    .map_err(|_| self.malformed())?
                    .to_string();
                self.pos = end;
                self.expect(b'"')?;
                self.expect(b';')?;
                Ok(Value::Str(text))
            }
            b'a' => {
                if self.depth >= MAX_DEPTH {
                    return Err(self.malformed());
                }
                let count = self.length(b':')?;
                self.expect(b'{')?;
                self.depth += 1;
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let key = self.value()?;
                    if !matches!(key, Value::Int(_) | Value::Str(_)) {
                        return Err(self.malformed());
                    }
                    let value = self.value()?;
                    entries.push((key, value));
                }
                self.depth -= 1;
                self.expect(b'}')?;
                Ok(Value::Array(entries))
            }
            other => Err(LegacyPayloadError::Unsupported(char::from(other))),
        }
    }

    fn next(&mut self) -> Result<u8, LegacyPayloadError> {
        let b = *self.bytes.get(self.pos).ok_or_else(|| self.malformed())?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, want: u8) -> Result<(), LegacyPayloadError> {
        let at = self.pos;
        match self.next()? {
            b if b == want => Ok(()),
            _ => Err(LegacyPayloadError::Malformed(at)),
        }
    }

    /// Text up to (not including) `delim`; consumes the delimiter.
    fn until(&mut self, delim: u8) -> Result<&'a str, LegacyPayloadError> {
        let start = self.pos;
        let rel = self.bytes[start..]
            .iter()
            .position(|b| *b == delim)
            .ok_or_else(|| self.malformed())?;
        self.pos = start + rel + 1;
        std::str::from_utf8(&self.bytes[start..start + rel])
            .map_err(|_| LegacyPayloadError::Malformed(start))
    }

    fn length(&mut self, delim: u8) -> Result<usize, LegacyPayloadError> {
        let at = self.pos;
        self.until(delim)?
            .parse::<usize>()
            .map_err(|_| LegacyPayloadError::Malformed(at))
    }

    fn malformed(&self) -> LegacyPayloadError {
        LegacyPayloadError::Malformed(self.pos)
    }
}

fn parse_float(raw: &str) -> Option<f64> {
    match raw {
        "INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NAN" => Some(f64::NAN),
        _ => raw.parse::<f64>().ok(),
    }
}
