use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

/// Marker byte that prefixes every segment-number component.
const SEGMENT_MARKER: u8 = 0x00;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NameParseError {
    #[error("name must start with '/': {0}")]
    NotAbsolute(String),
    #[error("bad percent escape in component {0:?}")]
    BadEscape(String),
    #[error("empty or dot-only component in {0:?}, write an empty component as '...'")]
    EmptyComponent(String),
}

/// One opaque component of a [`ResourceName`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameComponent(Bytes);

impl NameComponent {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Numbers are `0x00` followed by the little-endian value without
    /// trailing zero bytes, so 0 is the single byte `0x00` and 256 is
    /// `00 00 01`. Segment numbers and file versions share this form.
    pub fn segment(n: u64) -> Self {
        let le = n.to_le_bytes();
        let keep = le.len() - le.iter().rev().take_while(|b| **b == 0).count();
        let mut buf = BytesMut::with_capacity(1 + keep);
        buf.put_u8(SEGMENT_MARKER);
        buf.put_slice(&le[..keep]);
        Self(buf.freeze())
    }

    pub fn as_segment(&self) -> Option<u64> {
        let (marker, rest) = self.0.split_first()?;
        if *marker != SEGMENT_MARKER || rest.len() > 8 || rest.last() == Some(&0) {
            return None;
        }
        Some(rest.iter().rev().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lossy text view, used when a component is known to carry UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    fn write_escaped(&self, out: &mut String) {
        // empty and dot-only components get three extra dots
        if self.0.iter().all(|b| *b == b'.') {
            out.push_str("...");
        }
        for b in self.0.iter() {
            let c = *b as char;
            if b.is_ascii_graphic() && c != '/' && c != '%' {
                out.push(c);
            } else {
                out.push_str(&format!("%{:02X}", b));
            }
        }
    }

    fn parse_escaped(s: &str) -> Result<Self, NameParseError> {
        if s.bytes().all(|b| b == b'.') {
            return match s.get(3..) {
                Some(dots) => Ok(Self(Bytes::copy_from_slice(dots.as_bytes()))),
                None => Err(NameParseError::EmptyComponent(s.to_string())),
            };
        }
        let raw = s.as_bytes();
        let mut out = BytesMut::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'%' {
                let hex = s
                    .get(i + 1..i + 3)
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| NameParseError::BadEscape(s.to_string()))?;
                out.put_u8(hex);
                i += 3;
            } else {
                out.put_u8(raw[i]);
                i += 1;
            }
        }
        Ok(Self(out.freeze()))
    }
}

impl From<&str> for NameComponent {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for NameComponent {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Vec<u8>> for NameComponent {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

/// Hierarchical name of a resource or of one of its segments.
///
/// Names are values: every derivation returns a new name and leaves the
/// original untouched. Two names are equal exactly when their component
/// sequences are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceName {
    components: Vec<NameComponent>,
}

impl ResourceName {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_components<I, C>(components: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<NameComponent>,
    {
        Self { components: components.into_iter().map(Into::into).collect() }
    }

    pub fn components(&self) -> &[NameComponent] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn append(&self, component: impl Into<NameComponent>) -> Self {
        let mut components = self.components.clone();
        components.push(component.into());
        Self { components }
    }

    pub fn join(&self, other: &ResourceName) -> Self {
        let mut components = self.components.clone();
        components.extend(other.components.iter().cloned());
        Self { components }
    }

    pub fn add_segment(&self, n: u64) -> Self {
        self.append(NameComponent::segment(n))
    }

    pub fn without_last_component(&self) -> Self {
        let keep = self.components.len().saturating_sub(1);
        Self { components: self.components[..keep].to_vec() }
    }

    pub fn last_component(&self) -> Option<&NameComponent> {
        self.components.last()
    }

    pub fn last_segment(&self) -> Option<u64> {
        self.last_component().and_then(NameComponent::as_segment)
    }

    pub fn starts_with(&self, prefix: &ResourceName) -> bool {
        self.components.starts_with(&prefix.components)
    }

    /// Escaped path form, `/a/b/%00%01`. The root renders as `/`.
    pub fn to_uri(&self) -> String {
        if self.components.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for c in &self.components {
            out.push('/');
            c.write_escaped(&mut out);
        }
        out
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl FromStr for ResourceName {
    type Err = NameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| NameParseError::NotAbsolute(s.to_string()))?;
        if rest.is_empty() {
            return Ok(Self::root());
        }
        let components = rest
            .strip_suffix('/')
            .unwrap_or(rest)
            .split('/')
            .map(NameComponent::parse_escaped)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { components })
    }
}
