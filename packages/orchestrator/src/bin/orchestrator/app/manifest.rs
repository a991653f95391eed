//! Runtime assumptions manifest.
//!
//! Every claim the orchestrator makes about a deployment that cannot be
//! checked at compile time lives here as data: precompile addresses,
//! pallet presence, account mapping requirements. Each claim carries a
//! citation or a verification procedure; startup refuses a manifest
//! with a bare claim.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct AssumptionsManifest {
    pub(crate) version: u32,
    pub(crate) claims: Vec<RuntimeClaim>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct RuntimeClaim {
    pub(crate) id: String,
    /// Which side of the topology the claim is about.
    pub(crate) scope: ClaimScope,
    pub(crate) claim: String,
    /// Upstream documentation or source backing the claim.
    #[serde(default)]
    pub(crate) citation: Option<String>,
    /// Procedure an operator can run to check the claim on a deployment.
    #[serde(default)]
    pub(crate) verify: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum ClaimScope {
    Hub,
    Spoke,
    CrossChain,
}

const MANIFEST_YAML: &[u8] = include_bytes!("../../../../assets/manifest.yaml");

impl AssumptionsManifest {
    /// Load and validate the embedded manifest. Startup fails on a
    /// malformed document, so a running orchestrator always serves a
    /// well-formed one.
    pub(crate) fn load() -> Result<&'static Self> {
        static MANIFEST: OnceCell<AssumptionsManifest> = OnceCell::new();
        MANIFEST.get_or_try_init(|| {
            let manifest: AssumptionsManifest = serde_yaml::from_slice(MANIFEST_YAML)
                .context("Could not parse assets/manifest.yaml")?;
            manifest.validate()?;
            Ok(manifest)
        })
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for claim in &self.claims {
            anyhow::ensure!(
                seen.insert(claim.id.as_str()),
                "Duplicate manifest claim id: {}",
                claim.id
            );
            anyhow::ensure!(
                claim.citation.is_some() || claim.verify.is_some(),
                "Manifest claim '{}' has neither a citation nor a verification procedure",
                claim.id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_manifest_is_valid() {
        let manifest = AssumptionsManifest::load().unwrap();
        assert!(!manifest.claims.is_empty());
    }

    #[test]
    fn bare_claim_rejected() {
        let manifest = AssumptionsManifest {
            version: 1,
            claims: vec![RuntimeClaim {
                id: "bare".to_owned(),
                scope: ClaimScope::Hub,
                claim: "something unverifiable".to_owned(),
                citation: None,
                verify: None,
            }],
        };
        assert!(manifest.validate().is_err());
    }
}
