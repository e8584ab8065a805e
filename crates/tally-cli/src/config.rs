//! Configuration loading for the CLI

use anyhow::{Context, Result};
use std::path::Path;
use tally_core::MeteringConfig;

/// Load the file if present, apply `TALLY_*` overrides, then validate.
///
/// A missing file is not an error; defaults apply.
pub fn load_config(path: &Path) -> Result<MeteringConfig> {
    let mut config = if path.exists() {
        MeteringConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?
    } else {
        MeteringConfig::default()
    };
    config
        .merge_with_env()
        .context("applying environment overrides")?;
    config.validate().context("validating configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.free.monthly_session_limit, 50);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[free]\nmonthly_session_limit = 75").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.free.monthly_session_limit, 75);
        assert_eq!(config.session.dedup_window_secs, 1800);
    }

    #[test]
    fn invalid_prices_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[premium]\nai_session_usd = 0.01\nnon_ai_session_usd = 0.02").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
