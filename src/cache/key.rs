//! Key Sanitizer Module
//!
//! Turns caller-supplied keys into safe storage names.

use std::fmt;

// == Safe Key ==
/// A key that is a single path segment: only `[A-Za-z0-9_]`.
///
/// Produced exclusively by [`clean`], so any `SafeKey` can be joined onto a
/// store root without escaping the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SafeKey(String);

impl SafeKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SafeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SafeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// == Clean ==
/// Replaces every run of characters outside `[A-Za-z0-9]` with one `_`.
///
/// Keys differing only in replaced characters collide: `"a/b"` and `"a-b"`
/// both become `"a_b"`.
pub fn clean(raw: &str) -> SafeKey {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }

    SafeKey(out)
}

// == Remote Escape ==
/// Characters the remote protocol forbids in keys, with their replacement.
pub const RESERVED_CHARS: [(char, &str); 8] = [
    ('{', "#123"),
    ('}', "#125"),
    ('(', "#40"),
    (')', "#41"),
    ('/', "#47"),
    ('\\', "#92"),
    ('@', "#64"),
    (':', "#58"),
];

/// Escapes reserved characters as `#<decimal code>` for the remote store.
pub fn escape_reserved(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match RESERVED_CHARS.iter().find(|(reserved, _)| *reserved == c) {
            Some((_, code)) => out.push_str(code),
            None => out.push(c),
        }
    }
    out
}
