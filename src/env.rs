//! Effective environment for the auxiliary services.
//!
//! Compiled-in defaults, optionally replaced by the `[defaults]` table of the
//! settings file, are overridden by a fixed whitelist of process environment
//! variables. Blank environment values never override; a blank settings
//! default is kept as-is, which is how an operator disables a service that
//! needs the value.

use std::collections::BTreeMap;

pub const UUID: &str = "UUID";
pub const FILE_PATH: &str = "FILE_PATH";
pub const NAME: &str = "NAME";
pub const HY2_PORT: &str = "HY2_PORT";
pub const NEZHA_SERVER: &str = "NEZHA_SERVER";
pub const NEZHA_KEY: &str = "NEZHA_KEY";
pub const NEZHA_TLS: &str = "NEZHA_TLS";

/// Every key the resolver will ever emit, and the only names read from the
/// process environment.
pub const WHITELIST: [&str; 7] = [UUID, FILE_PATH, NAME, HY2_PORT, NEZHA_SERVER, NEZHA_KEY, NEZHA_TLS];

const DEFAULTS: [(&str, &str); 7] = [
    (UUID, "67535146-0fbf-480b-8e4f-0a6d681119c9"),
    (FILE_PATH, "./world"),
    (NAME, "node-1"),
    (HY2_PORT, "35442"),
    (NEZHA_SERVER, "nezha.example.com:80"),
    (NEZHA_KEY, "change-me-agent-secret"),
    (NEZHA_TLS, "false"),
];

/// Resolved key/value mapping. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    vars: BTreeMap<String, String>,
}

impl EffectiveConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Like [`get`](Self::get) but treats whitespace-only values as absent.
    pub fn non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Whether `key` may appear in an [`EffectiveConfig`].
pub fn is_whitelisted(key: &str) -> bool {
    WHITELIST.contains(&key)
}

/// Resolve against the current process environment.
pub fn resolve() -> EffectiveConfig {
    resolve_with(process_env)
}

/// Lookup over the process environment; non-unicode values count as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Resolve against an arbitrary lookup. Tests pass a closure over a map
/// instead of mutating the process environment.
pub fn resolve_with<F>(lookup: F) -> EffectiveConfig
where
    F: Fn(&str) -> Option<String>,
{
    resolve_layered(&BTreeMap::new(), lookup)
}

/// Resolve with `defaults` layered over the compiled-in table. Keys outside
/// the whitelist are ignored.
pub fn resolve_layered<F>(defaults: &BTreeMap<String, String>, lookup: F) -> EffectiveConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut vars: BTreeMap<String, String> = DEFAULTS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (key, value) in defaults.iter().filter(|(k, _)| is_whitelisted(k)) {
        vars.insert(key.clone(), value.clone());
    }

    for key in WHITELIST {
        if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
            vars.insert(key.to_string(), value);
        }
    }

    EffectiveConfig { vars }
}
