//! Declared names.
//!
//! Class and function names resolve case-insensitively, so [`Name`] compares
//! and hashes on the ASCII-lowercased text while keeping the spelling it was
//! declared with for messages.

use std::{
    borrow::Cow,
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
    sync::Arc,
};

#[derive(Clone)]
pub struct Name(Arc<str>);

impl Name {
    pub fn new(value: &str) -> Self {
        Self(Arc::from(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a borrowed name.
    #[inline]
    pub fn same(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.same(&other.0)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl Deref for Name {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// Strips the leading namespace separator of a fully qualified name.
/// Returns `None` when there is nothing to strip.
pub fn normalize_ns(name: &str) -> Option<&str> {
    name.strip_prefix('\\').filter(|rest| !rest.is_empty())
}

/// Registry key for `name`; borrows when it is already lowercase.
pub(crate) fn fold_case(name: &str) -> Cow<'_, str> {
    if name.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(name.to_ascii_lowercase())
    } else {
        Cow::Borrowed(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_compare_without_case() {
        let a = Name::new("HttpClient");
        let b = Name::new("httpclient");
        assert_eq!(a, b);
        assert!(a.same("HTTPCLIENT"));
        assert_eq!(a.as_str(), "HttpClient");

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn namespace_prefix_is_stripped_once() {
        assert_eq!(normalize_ns("\\App\\Model"), Some("App\\Model"));
        assert_eq!(normalize_ns("App\\Model"), None);
        assert_eq!(normalize_ns("\\"), None);
    }

    #[test]
    fn fold_case_borrows_lowercase() {
        assert!(matches!(fold_case("already"), Cow::Borrowed(_)));
        assert_eq!(fold_case("MiXeD"), "mixed");
    }
}
