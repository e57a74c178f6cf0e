use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::MvpError;

// ---------------------------------------------------------------------------
// ReferenceSpace
// ---------------------------------------------------------------------------

/// Coordinate system the patterns are expressed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceSpace {
    /// MNI152 2mm standard space.
    #[default]
    Mni,
    /// Native functional (EPI) space.
    Epi,
}

impl FromStr for ReferenceSpace {
    type Err = MvpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mni" => Ok(ReferenceSpace::Mni),
            "epi" => Ok(ReferenceSpace::Epi),
            other => Err(MvpError::Config(format!(
                "unknown reference space '{other}' (expected 'mni' or 'epi')"
            ))),
        }
    }
}

impl fmt::Display for ReferenceSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceSpace::Mni => write!(f, "mni"),
            ReferenceSpace::Epi => write!(f, "epi"),
        }
    }
}

// ---------------------------------------------------------------------------
// MvpConfig
// ---------------------------------------------------------------------------

/// Construction-time options of a pattern container.
///
/// Every field has a default, so a JSON config only needs the keys it
/// overrides:
///
/// ```json
/// { "ref_space": "epi", "remove_cope": ["nuisance"] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MvpConfig {
    /// Lower bound applied when binarizing a probabilistic mask.
    pub mask_threshold: f64,
    /// Divide betas by their standard deviation on load.
    pub beta2tstat: bool,
    pub ref_space: ReferenceSpace,
    /// Mask to index patterns with. `None` means whole brain.
    pub mask_path: Option<PathBuf>,
    /// Condition names (or substrings) dropped by the loader.
    pub remove_cope: Vec<String>,
}

impl Default for MvpConfig {
    fn default() -> Self {
        Self {
            mask_threshold: 0.0,
            beta2tstat: true,
            ref_space: ReferenceSpace::Mni,
            mask_path: None,
            remove_cope: Vec::new(),
        }
    }
}

impl MvpConfig {
    /// Read a config from a JSON file; absent keys keep their defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: MvpConfig = serde_json::from_str(&text).context("parsing config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no mask could satisfy.
    pub fn validate(&self) -> Result<(), MvpError> {
        if !self.mask_threshold.is_finite() {
            return Err(MvpError::Config(format!(
                "mask_threshold must be finite, got {}",
                self.mask_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = MvpConfig::default();
        assert_eq!(cfg.mask_threshold, 0.0);
        assert!(cfg.beta2tstat);
        assert_eq!(cfg.ref_space, ReferenceSpace::Mni);
        assert!(cfg.mask_path.is_none());
        assert!(cfg.remove_cope.is_empty());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: MvpConfig =
            serde_json::from_str(r#"{ "ref_space": "epi", "remove_cope": ["nuisance"] }"#)
                .unwrap();
        assert_eq!(cfg.ref_space, ReferenceSpace::Epi);
        assert_eq!(cfg.remove_cope, vec!["nuisance"]);
        assert!(cfg.beta2tstat);
    }

    #[test]
    fn reference_space_parsing() {
        assert_eq!("mni".parse::<ReferenceSpace>().unwrap(), ReferenceSpace::Mni);
        assert_eq!("epi".parse::<ReferenceSpace>().unwrap(), ReferenceSpace::Epi);
        assert!(matches!(
            "MNI".parse::<ReferenceSpace>(),
            Err(MvpError::Config(_))
        ));
        assert_eq!(ReferenceSpace::Epi.to_string(), "epi");
    }

    #[test]
    fn non_finite_threshold_is_rejected() {
        let cfg = MvpConfig {
            mask_threshold: f64::NAN,
            ..MvpConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn from_json_file_reads_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mvp.json");
        std::fs::write(&path, r#"{ "mask_threshold": 0.3, "beta2tstat": false }"#).unwrap();
        let cfg = MvpConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.mask_threshold, 0.3);
        assert!(!cfg.beta2tstat);
    }
}
