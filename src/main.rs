use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use rusty_mvp::{MvpConfig, ReferenceSpace, load_mvp};

/// Load first-level patterns for one run and summarise the container.
#[derive(Parser)]
#[command(name = "rusty-mvp")]
#[command(author, version, about = "Multivoxel pattern container for fMRI runs", long_about = None)]
struct Cli {
    /// First-level run directory, e.g. /data/sub001/run_wm_1.feat
    directory: PathBuf,

    /// Pattern table (.parquet, .json or .csv)
    #[arg(short, long)]
    patterns: PathBuf,

    /// Mask volume (.json); whole brain when omitted
    #[arg(short, long)]
    mask: Option<PathBuf>,

    /// JSON config; flags below override it
    #[arg(short, long, env = "RUSTY_MVP_CONFIG")]
    config: Option<PathBuf>,

    /// Reference space: mni or epi
    #[arg(long)]
    ref_space: Option<ReferenceSpace>,

    /// Lower bound for probabilistic masks
    #[arg(long)]
    mask_threshold: Option<f64>,

    /// Condition name (or substring) to drop; repeatable
    #[arg(long = "remove-cope")]
    remove_cope: Vec<String>,

    /// Keep raw betas instead of converting to t-values
    #[arg(long)]
    keep_betas: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn into_config(self) -> Result<(PathBuf, PathBuf, MvpConfig, bool)> {
        let mut config = match &self.config {
            Some(path) => MvpConfig::from_json_file(path)?,
            None => MvpConfig::default(),
        };
        if let Some(space) = self.ref_space {
            config.ref_space = space;
        }
        if let Some(threshold) = self.mask_threshold {
            config.mask_threshold = threshold;
        }
        if self.mask.is_some() {
            config.mask_path = self.mask;
        }
        config.remove_cope.extend(self.remove_cope);
        if self.keep_betas {
            config.beta2tstat = false;
        }
        Ok((self.directory, self.patterns, config, self.json))
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let (directory, patterns, config, json) = Cli::parse().into_config()?;
    log::debug!("config: {config:?}");

    let mvp = match load_mvp(&directory, &patterns, config) {
        Ok(mvp) => mvp,
        Err(e) => {
            log::error!("Failed to load patterns: {e:#}");
            return Err(e);
        }
    };

    let summary = mvp.summary();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{summary}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> (PathBuf, PathBuf, MvpConfig, bool) {
        let mut argv = vec!["rusty-mvp"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().into_config().unwrap()
    }

    #[test]
    fn defaults_without_flags() {
        let (directory, patterns, config, json) =
            parse(&["/data/sub001/run_1.feat", "--patterns", "p.parquet"]);
        assert_eq!(directory, PathBuf::from("/data/sub001/run_1.feat"));
        assert_eq!(patterns, PathBuf::from("p.parquet"));
        assert_eq!(config, MvpConfig::default());
        assert!(!json);
    }

    #[test]
    fn flags_set_config_fields() {
        let (_, _, config, json) = parse(&[
            "/d/s/run_1",
            "-p",
            "p.json",
            "--mask",
            "/masks/V1/mask.json",
            "--ref-space",
            "epi",
            "--mask-threshold",
            "0.25",
            "--remove-cope",
            "motion",
            "--remove-cope",
            "nuisance",
            "--keep-betas",
            "--json",
        ]);
        assert_eq!(config.mask_path, Some(PathBuf::from("/masks/V1/mask.json")));
        assert_eq!(config.ref_space, ReferenceSpace::Epi);
        assert_eq!(config.mask_threshold, 0.25);
        assert_eq!(config.remove_cope, vec!["motion", "nuisance"]);
        assert!(!config.beta2tstat);
        assert!(json);
    }

    #[test]
    fn flags_layer_over_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mvp.json");
        std::fs::write(
            &path,
            r#"{ "ref_space": "epi", "mask_threshold": 0.5, "remove_cope": ["motion"] }"#,
        )
        .unwrap();

        let (_, _, config, _) = parse(&[
            "/d/s/run_1",
            "-p",
            "p.csv",
            "--config",
            path.to_str().unwrap(),
            "--ref-space",
            "mni",
            "--remove-cope",
            "nuisance",
        ]);
        assert_eq!(config.ref_space, ReferenceSpace::Mni);
        assert_eq!(config.mask_threshold, 0.5);
        assert_eq!(config.remove_cope, vec!["motion", "nuisance"]);
        assert!(config.mask_path.is_none());
        assert!(config.beta2tstat);
    }

    #[test]
    fn bad_reference_space_is_rejected() {
        let result = Cli::try_parse_from(["rusty-mvp", "/d/s/r", "-p", "p.csv", "--ref-space", "tal"]);
        assert!(result.is_err());
    }

    #[test]
    fn patterns_flag_is_required() {
        assert!(Cli::try_parse_from(["rusty-mvp", "/d/s/r"]).is_err());
    }
}
