//! Config file and environment loading.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML file
//! (`--config` or `./octofhir-sdc.toml`), then `OCTOFHIR_SDC__*` variables
//! such as `OCTOFHIR_SDC__TERMINOLOGY__ENABLED=false`.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use config::{Config, Environment, File};
use octofhir_sdc::SdcConfig;

const DEFAULT_CONFIG_FILE: &str = "octofhir-sdc.toml";
const ENV_PREFIX: &str = "OCTOFHIR_SDC";

pub fn load_config(path: Option<&str>) -> Result<SdcConfig> {
    let mut builder = Config::builder();
    match path {
        Some(p) => {
            let pathbuf = PathBuf::from(p);
            if !pathbuf.exists() {
                return Err(anyhow!("Config file not found: {p}"));
            }
            builder = builder.add_source(File::from(pathbuf));
        }
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                builder = builder.add_source(File::from(default.to_path_buf()));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .try_parsing(true)
            .separator("__"),
    );

    let cfg = builder
        .build()
        .map_err(|e| anyhow!("config build error: {e}"))?;
    let merged: SdcConfig = cfg
        .try_deserialize()
        .map_err(|e| anyhow!("config deserialize error: {e}"))?;
    merged.validate().map_err(|e| anyhow!("invalid config: {e}"))?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "timeout_ms = 2500\n\n[terminology]\nenabled = false\n\n[logging]\nlevel = \"debug\""
        )
        .unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.timeout_ms, 2500);
        assert!(!config.terminology.enabled);
        assert_eq!(config.terminology.cache_ttl_secs, 3600);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = load_config(Some("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "timeout_ms = 0").unwrap();

        let err = load_config(file.path().to_str()).unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }
}
