//! The two auxiliary services: names, artifacts and command lines.

use std::path::Path;

use thiserror::Error;

use crate::{
    artifact::{ArchUrls, ArtifactDescriptor},
    env::{EffectiveConfig, NEZHA_KEY, NEZHA_SERVER, NEZHA_TLS},
};

/// Proxy service, started first with the full effective environment.
pub const HY2_SERVICE: &str = "HY2";
pub const SBX_ARTIFACT: &str = "sbx";

/// Monitoring agent, configured only through its argument vector.
pub const NEZHA_SERVICE: &str = "Nezha Agent";
pub const NEZHA_ARTIFACT: &str = "nezha-agent";

pub fn sbx_descriptor(urls: &ArchUrls, cache_dir: &Path) -> ArtifactDescriptor {
    ArtifactDescriptor::new(SBX_ARTIFACT, urls.clone(), cache_dir)
}

pub fn nezha_descriptor(urls: &ArchUrls, cache_dir: &Path) -> ArtifactDescriptor {
    ArtifactDescriptor::new(NEZHA_ARTIFACT, urls.clone(), cache_dir)
}

/// The agent cannot run without an endpoint and a secret. Not fatal: the
/// agent is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("nezha agent configuration missing: {}", .missing.join(", "))]
pub struct MissingAuxConfig {
    pub missing: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NezhaArgs {
    pub server: String,
    pub key: String,
    pub tls: bool,
}

impl NezhaArgs {
    pub fn from_config(config: &EffectiveConfig) -> Result<Self, MissingAuxConfig> {
        let server = config.non_blank(NEZHA_SERVER);
        let key = config.non_blank(NEZHA_KEY);

        match (server, key) {
            (Some(server), Some(key)) => Ok(Self {
                server: server.to_string(),
                key: key.to_string(),
                tls: config.get(NEZHA_TLS).is_some_and(parse_bool),
            }),
            _ => {
                let missing = [(NEZHA_SERVER, server), (NEZHA_KEY, key)]
                    .into_iter()
                    .filter(|(_, v)| v.is_none())
                    .map(|(k, _)| k)
                    .collect();
                Err(MissingAuxConfig { missing })
            }
        }
    }

    /// `[binary, -s, server, -p, key]`, plus `--tls` when enabled.
    pub fn argv(&self, binary: &Path) -> Vec<String> {
        let mut argv = vec![
            binary.to_string_lossy().into_owned(),
            "-s".to_string(),
            self.server.clone(),
            "-p".to_string(),
            self.key.clone(),
        ];
        if self.tls {
            argv.push("--tls".to_string());
        }
        argv
    }
}

/// Only a case-insensitive `true` counts; anything else is false.
fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}
