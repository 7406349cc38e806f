//! Object identities.
//!
//! An [`Identity`] names a logical remote object independently of whichever servant currently
//! implements it. Identities are plain values: equality, ordering and hashing are structural over
//! `(category, name)`.
//!
//! The string form is `category/name`, or just `name` when the category is empty. Slashes and
//! backslashes inside either component are escaped with a backslash so the form always parses back
//! to the same identity.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{IdentityParseError, StreamError},
    stream::{InputStream, OutputStream},
};

/// The identity of a remote-addressable object.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// The category. An empty category selects the default servant locator.
    pub category: String,
    /// The name. Registered identities always have a non-empty name.
    pub name: String,
}

impl Identity {
    /// Creates a new identity from a name and category.
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Identity {
            category: category.into(),
            name: name.into(),
        }
    }

    /// Creates a new identity with an empty category.
    pub fn named(name: impl Into<String>) -> Self {
        Identity::new(name, "")
    }

    /// Returns `true` if this identity may be registered with an adapter.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }

    /// Reads an identity from the wire.
    ///
    /// The name is encoded before the category.
    pub fn read(input: &mut InputStream) -> Result<Self, StreamError> {
        let name = input.read_string()?;
        let category = input.read_string()?;
        Ok(Identity { category, name })
    }

    /// Writes this identity to the wire.
    pub fn write(&self, output: &mut OutputStream) {
        output.write_string(&self.name);
        output.write_string(&self.category);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.category.is_empty() {
            f.write_str(&escape(&self.name, '/'))
        } else {
            write!(
                f,
                "{}/{}",
                escape(&self.category, '/'),
                escape(&self.name, '/')
            )
        }
    }
}

impl FromStr for Identity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut separator = None;
        let mut escaped = false;
        for (i, c) in s.char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '/' if separator.is_none() => separator = Some(i),
                '/' => return Err(IdentityParseError::UnescapedSlash(s.to_string())),
                _ => {}
            }
        }
        if escaped {
            return Err(IdentityParseError::TrailingEscape(s.to_string()));
        }

        let identity = match separator {
            Some(i) => Identity {
                category: unescape(&s[..i]),
                name: unescape(&s[i + 1..]),
            },
            None => Identity::named(unescape(s)),
        };
        Ok(identity)
    }
}

/// Escapes backslashes and the given `special` character with a backslash.
pub(crate) fn escape(s: &str, special: char) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || c == special {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}
