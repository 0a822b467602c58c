pub mod core_config;
pub mod document;
pub mod msp_dir;

pub use core_config::{PeerOverrides, EXTERNAL_BUILDERS, REQUIRED_SECTIONS};
pub use document::ConfigDocument;
pub use msp_dir::write_trust_directory;

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::pki::Identity;

/// File name of the peer configuration, both as template and as generated output.
pub const CORE_CONFIG_FILE: &str = "core.yaml";

/// Turns identities and node parameters into the files a node process reads at startup.
#[derive(Debug, Clone)]
pub struct RuntimeMaterializer {
    config: RuntimeConfig,
}

impl RuntimeMaterializer {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    pub fn template_path(&self) -> PathBuf {
        self.config.template_dir.join(CORE_CONFIG_FILE)
    }

    /// Write the MSP directory for `identity` at `path`.
    pub fn write_trust_directory(&self, path: &Path, identity: &Identity) -> Result<()> {
        write_trust_directory(path, identity)
    }

    /// Load the `core.yaml` template and return it patched with `overrides`, serialized.
    ///
    /// The template file itself is never modified.
    pub fn synthesize_config(&self, overrides: &PeerOverrides<'_>) -> Result<Vec<u8>> {
        let template = self.template_path();
        debug!("Synthesizing peer config from {}", template.display());

        let mut document = ConfigDocument::load(&template)?;
        core_config::apply_peer_overrides(&mut document, overrides, &self.config.builders_dir)?;
        document.to_bytes()
    }
}
