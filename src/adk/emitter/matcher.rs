// SPDX-License-Identifier: MIT

//! Listener matchers

use super::event::EventMeta;
use crate::adk::error::EmitterError;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Predicate over event metadata
pub type MetaPredicate = Arc<dyn Fn(&EventMeta) -> bool + Send + Sync>;

/// Decides which events a listener receives.
///
/// Matching is relative to the emitter the listener was registered on.
#[derive(Clone)]
pub enum Matcher {
    /// Event name (or dotted sub-path) relative to the emitter
    Name(String),
    /// `*`: events emitted directly by the emitter
    Direct,
    /// `*.*`: every event the emitter sees, nested and piped included
    All,
    /// Regular expression against the full dotted path
    Regex(Regex),
    /// Arbitrary predicate over the metadata
    Predicate(MetaPredicate),
}

impl Matcher {
    pub fn regex(pattern: &str) -> Result<Self, EmitterError> {
        Ok(Self::Regex(Regex::new(pattern)?))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&EventMeta) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub(crate) fn matches(&self, namespace: &[String], meta: &EventMeta) -> bool {
        match self {
            Matcher::Name(name) => {
                if namespace.is_empty() {
                    meta.path == *name
                } else {
                    meta.path
                        .strip_prefix(namespace.join(".").as_str())
                        .and_then(|rest| rest.strip_prefix('.'))
                        .is_some_and(|rest| rest == name)
                }
            }
            Matcher::Direct => meta.namespace == namespace,
            Matcher::All => true,
            Matcher::Regex(re) => re.is_match(&meta.path),
            Matcher::Predicate(f) => f(meta),
        }
    }
}

impl From<&str> for Matcher {
    fn from(value: &str) -> Self {
        match value {
            "*" => Matcher::Direct,
            "*.*" => Matcher::All,
            name => Matcher::Name(name.to_string()),
        }
    }
}

impl From<String> for Matcher {
    fn from(value: String) -> Self {
        Matcher::from(value.as_str())
    }
}

impl From<Regex> for Matcher {
    fn from(value: Regex) -> Self {
        Matcher::Regex(value)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Name(name) => write!(f, "Name({name})"),
            Matcher::Direct => f.write_str("*"),
            Matcher::All => f.write_str("*.*"),
            Matcher::Regex(re) => write!(f, "Regex({})", re.as_str()),
            Matcher::Predicate(_) => f.write_str("Predicate"),
        }
    }
}
