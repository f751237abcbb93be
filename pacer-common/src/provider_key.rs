//! Provider key newtype for type safety
//!
//! Wraps the canonical string that identifies a destination mail provider
//! (normally an MX host or an administrative grouping of one) to prevent
//! accidentally passing a raw recipient domain, a hostname, or some other
//! string where a canonical provider key is expected. Provides a zero-cost
//! abstraction with compile-time type safety.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// A canonical provider identity string wrapper for type safety
///
/// This newtype prevents accidentally passing a recipient domain or raw MX
/// hostname where an already-normalized provider key is expected. The
/// `#[repr(transparent)]` attribute ensures this is a zero-cost abstraction
/// at runtime.
///
/// # Examples
///
/// ```
/// use pacer_common::ProviderKey;
///
/// let key = ProviderKey::new("google.com");
/// assert_eq!(key.as_str(), "google.com");
///
/// // Zero-cost conversion from String
/// let key: ProviderKey = "outlook.com".into();
/// assert_eq!(key.as_str(), "outlook.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)] // Zero-cost abstraction guarantee
pub struct ProviderKey(Arc<str>);

impl ProviderKey {
    /// Create a new `ProviderKey` from any type that can be converted to `Arc<str>`
    ///
    /// Mapping is case-insensitive (§4.1): the input is canonicalized to
    /// lowercase, so `"Google.com"` and `"google.com"` produce equal keys
    /// and hash to the same bucket in `ProviderStateStore`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use pacer_common::ProviderKey;
    ///
    /// let key = ProviderKey::new("Google.COM");
    /// assert_eq!(key.as_str(), "google.com");
    /// let key = ProviderKey::new(String::from("google.com"));
    /// let key = ProviderKey::new(Arc::from("google.com"));
    /// ```
    #[must_use]
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        let s: Arc<str> = s.into();
        if s.chars().any(|c| c.is_ascii_uppercase()) {
            Self(Arc::from(s.to_ascii_lowercase()))
        } else {
            Self(s)
        }
    }

    /// Get the provider key as a string slice
    ///
    /// # Examples
    ///
    /// ```
    /// use pacer_common::ProviderKey;
    ///
    /// let key = ProviderKey::new("google.com");
    /// assert_eq!(key.as_str(), "google.com");
    /// ```
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the provider key into the inner `Arc<str>`
    ///
    /// # Examples
    ///
    /// ```
    /// use pacer_common::ProviderKey;
    ///
    /// let key = ProviderKey::new("google.com");
    /// let arc_str = key.into_inner();
    /// ```
    #[must_use]
    pub fn into_inner(self) -> Arc<str> {
        self.0
    }
}

impl Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ProviderKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ProviderKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for ProviderKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ProviderKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Arc<str>> for ProviderKey {
    fn from(s: Arc<str>) -> Self {
        Self::new(s)
    }
}

impl From<ProviderKey> for Arc<str> {
    fn from(key: ProviderKey) -> Self {
        key.0
    }
}

impl From<&ProviderKey> for Arc<str> {
    fn from(key: &ProviderKey) -> Self {
        key.0.clone()
    }
}
