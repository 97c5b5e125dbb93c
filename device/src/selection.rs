//! Platform selection policy.
//!
//! Discovery creates a context for every platform and keeps only those the
//! policy accepts. The default keeps NVIDIA and AMD platforms.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::backend::PlatformInfo;

/// Vendor tokens accepted when no policy is configured.
pub const DEFAULT_VENDOR_TOKENS: [&str; 2] = ["nvidia", "amd"];

/// Arbitrary predicate over platform metadata.
pub type PlatformPredicate = Arc<dyn Fn(&PlatformInfo) -> bool + Send + Sync>;

/// Case-insensitive substring match of the platform name against vendor tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorAllowList {
    tokens: SmallVec<[String; 4]>,
}

impl VendorAllowList {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = tokens.into_iter().map(|t| t.as_ref().trim().to_lowercase()).filter(|t| !t.is_empty()).collect();
        Self { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn accepts(&self, platform: &PlatformInfo) -> bool {
        let name = platform.name.to_lowercase();
        self.tokens.iter().any(|token| name.contains(token.as_str()))
    }
}

impl Default for VendorAllowList {
    fn default() -> Self {
        Self::new(DEFAULT_VENDOR_TOKENS)
    }
}

/// Decides which platforms keep their context after discovery.
#[derive(Clone)]
pub enum SelectionPolicy {
    AllowList(VendorAllowList),
    /// Keep every platform.
    Any,
    Custom(PlatformPredicate),
}

impl SelectionPolicy {
    /// Build a policy from a plain closure.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&PlatformInfo) -> bool + Send + Sync + 'static,
    {
        SelectionPolicy::Custom(Arc::new(predicate))
    }

    pub fn accepts(&self, platform: &PlatformInfo) -> bool {
        match self {
            SelectionPolicy::AllowList(list) => list.accepts(platform),
            SelectionPolicy::Any => true,
            SelectionPolicy::Custom(predicate) => predicate(platform),
        }
    }
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy::AllowList(VendorAllowList::default())
    }
}

impl fmt::Debug for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::AllowList(list) => f.debug_tuple("AllowList").field(&list.tokens).finish(),
            SelectionPolicy::Any => write!(f, "Any"),
            SelectionPolicy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
