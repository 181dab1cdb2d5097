//! Exit code policies deciding whether a process run counts as successful

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Rule applied to a process exit code
#[derive(Clone, Default)]
pub enum ExitCodePolicy {
    /// Only `0` is successful
    #[default]
    Zero,
    /// Exactly this code is successful
    Code(i32),
    /// Any code in the set is successful
    OneOf(BTreeSet<i32>),
    /// Every exit code is successful
    Any,
    /// Caller supplied predicate
    Custom(Arc<dyn Fn(i32) -> bool + Send + Sync>),
}

impl ExitCodePolicy {
    /// Build a policy accepting any of the given codes
    pub fn one_of<I>(codes: I) -> Self
    where
        I: IntoIterator<Item = i32>,
    {
        Self::OneOf(codes.into_iter().collect())
    }

    /// Build a policy from an arbitrary predicate
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(i32) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Whether `code` satisfies this policy
    pub fn accepts(&self, code: i32) -> bool {
        match self {
            Self::Zero => code == 0,
            Self::Code(expected) => code == *expected,
            Self::OneOf(codes) => codes.contains(&code),
            Self::Any => true,
            Self::Custom(predicate) => predicate(code),
        }
    }
}

impl fmt::Debug for ExitCodePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero => f.write_str("Zero"),
            Self::Code(code) => f.debug_tuple("Code").field(code).finish(),
            Self::OneOf(codes) => f.debug_tuple("OneOf").field(codes).finish(),
            Self::Any => f.write_str("Any"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
