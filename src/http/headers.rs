//! HTTP headers handling
//!
//! `Headers` keeps insertion order and compares names case-insensitively.
//! A connection also uses it as its key/value staging registry, where the
//! response headers sit next to the pseudo-keys below.

use super::MAX_HEADERS;
use std::fmt;

/// Request method of the last exchange
pub const PSEUDO_METHOD: &str = ":method";
/// Request line as sent
pub const PSEUDO_REQUEST_LINE: &str = ":request-line";
/// Response protocol, e.g. "HTTP/1.1"
pub const PSEUDO_PROTOCOL: &str = ":protocol";
/// Numeric response status
pub const PSEUDO_STATUS: &str = ":status";
/// Response reason phrase
pub const PSEUDO_REASON: &str = ":reason";

/// HTTP headers collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Insert a header
    ///
    /// An existing header with the same name gets another value rather
    /// than being replaced. Inserts beyond `MAX_HEADERS` are dropped.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.headers.len() >= MAX_HEADERS {
            return;
        }
        self.headers.push((name.into(), value.into()));
    }

    /// Replace every value of `name` with a single one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.insert(name, value);
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all instances of a header (case-insensitive)
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.headers.len()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn clear(&mut self) {
        self.headers.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Split a response header line at its first colon
    ///
    /// The name is trimmed and lower-cased. Lines without a colon, or with
    /// an empty name, yield `None` and are skipped by the parser.
    pub fn parse_header_line(line: &str) -> Option<(String, String)> {
        let (name, value) = line.split_once(':')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some((name.to_ascii_lowercase(), value.trim().to_string()))
    }
}

/// Bytes allowed anywhere in a response head
pub fn is_head_byte(b: u8) -> bool {
    matches!(b, 0x20..=0x7e | b'\r' | b'\n')
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");
        headers.insert("Content-Length", "42");

        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        assert_eq!(headers.get("content-length"), Some("42"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_multiple_values() {
        let mut headers = Headers::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("set-cookie", "b=2");

        assert_eq!(headers.get_all("SET-COOKIE"), vec!["a=1", "b=2"]);
        assert_eq!(headers.get("Set-Cookie"), Some("a=1"));
    }

    #[test]
    fn test_set_replaces() {
        let mut headers = Headers::new();
        headers.insert("X-Custom", "first");
        headers.insert("x-custom", "second");
        headers.set("X-CUSTOM", "only");

        assert_eq!(headers.get_all("x-custom"), vec!["only"]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_remove_and_contains() {
        let mut headers = Headers::new();
        headers.insert("X-Remove", "value1");
        headers.insert("X-Keep", "value2");
        headers.insert("X-Remove", "value3");

        assert_eq!(headers.remove("x-remove"), 2);
        assert!(!headers.contains("X-Remove"));
        assert!(headers.contains("x-keep"));
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = Headers::parse_header_line("Content-Type: text/html").unwrap();
        assert_eq!(name, "content-type");
        assert_eq!(value, "text/html");

        let (name, value) = Headers::parse_header_line("Location: http://a/b:c").unwrap();
        assert_eq!(name, "location");
        assert_eq!(value, "http://a/b:c");

        assert_eq!(Headers::parse_header_line("no colon here"), None);
        assert_eq!(Headers::parse_header_line("  : value"), None);
    }

    #[test]
    fn test_head_bytes() {
        assert!(b"HTTP/1.1 200 OK\r\n".iter().all(|&b| is_head_byte(b)));
        assert!(!is_head_byte(0x00));
        assert!(!is_head_byte(b'\t'));
        assert!(!is_head_byte(0x7f));
        assert!(!is_head_byte(0xc3));
    }

    #[test]
    fn test_max_headers() {
        let mut headers = Headers::new();
        for i in 0..MAX_HEADERS + 10 {
            headers.insert(format!("Header-{}", i), "value");
        }
        assert_eq!(headers.len(), MAX_HEADERS);
    }
}
