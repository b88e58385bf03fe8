//! Captured process output: text or raw bytes, fixed by the run's binary flag.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    Text(String),
    Bytes(Vec<u8>),
}

impl Captured {
    /// Binary keeps the raw bytes; text decodes UTF-8 (lossy), folding
    /// `\r\n` and lone `\r` into `\n` only when `universal_newlines` is set.
    pub fn decode(raw: Vec<u8>, binary: bool, universal_newlines: bool) -> Self {
        if binary {
            return Captured::Bytes(raw);
        }
        let text = String::from_utf8_lossy(&raw);
        if universal_newlines {
            Captured::Text(normalize_newlines(&text))
        } else {
            Captured::Text(text.into_owned())
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Captured::Text(s) => s.as_bytes(),
            Captured::Bytes(b) => b,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Captured::Text(s) => Some(s),
            Captured::Bytes(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool { self.as_bytes().is_empty() }
    pub fn is_binary(&self) -> bool { matches!(self, Captured::Bytes(_)) }
}

impl fmt::Display for Captured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Captured::Text(s) => f.write_str(s),
            Captured::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
        }
    }
}

impl PartialEq<str> for Captured {
    fn eq(&self, other: &str) -> bool { self.as_str() == Some(other) }
}

impl PartialEq<&str> for Captured {
    fn eq(&self, other: &&str) -> bool { self.as_str() == Some(*other) }
}

fn normalize_newlines(s: &str) -> String {
    if !s.contains('\r') { return s.to_string(); }
    s.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_mode_normalizes_line_endings() {
        let c = Captured::decode(b"a\r\nb\rc\n".to_vec(), false, true);
        assert_eq!(c, "a\nb\nc\n");
    }

    #[test]
    fn text_mode_without_translation_keeps_carriage_returns() {
        let c = Captured::decode(b"a\r\nb".to_vec(), false, false);
        assert_eq!(c, "a\r\nb");
        assert_eq!(c.as_bytes().len(), 4);
    }

    #[test]
    fn binary_mode_keeps_bytes() {
        let c = Captured::decode(vec![0xff, b'\r', b'\n'], true, true);
        assert!(c.is_binary());
        assert_eq!(c.as_bytes(), &[0xff, b'\r', b'\n']);
        assert_eq!(c.as_str(), None);
    }

    #[test]
    fn invalid_utf8_is_replaced_in_text_mode() {
        let c = Captured::decode(vec![b'o', 0xff, b'k'], false, true);
        assert_eq!(c, "o\u{fffd}k");
    }
}
