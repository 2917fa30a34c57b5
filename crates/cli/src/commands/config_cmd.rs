//! `strata config`: configuration management commands.

use anyhow::Context as _;
use std::path::Path;
use strata_config::StrataConfig;

pub fn show(config: &StrataConfig) -> anyhow::Result<()> {
    let mut redacted = config.clone();
    if redacted.serving.api_key.is_some() {
        redacted.serving.api_key = Some("[REDACTED]".into());
    }
    println!("{}", toml::to_string_pretty(&redacted)?);
    Ok(())
}

pub fn validate(path: &Path) -> anyhow::Result<()> {
    println!("Validating {}", path.display());
    let config = StrataConfig::load_from(path)?;

    let mut warnings = Vec::new();
    if config.env == "production" && config.serving.api_key.is_none() {
        warnings.push("production environment without serving.api_key");
    }
    if config.serving.host == "0.0.0.0" && config.serving.api_key.is_none() {
        warnings.push("serving API bound to 0.0.0.0 without an API key");
    }
    if config.breaker.call_timeout().is_none() {
        warnings.push("breaker.call_timeout_ms = 0 leaves cache calls unbounded");
    }

    println!("  Config parsed successfully");
    for warning in &warnings {
        println!("  warning: {warning}");
    }
    println!("  Serving:  {}", config.bind_address());
    println!("  Breaker:  {} failures / {}s", config.breaker.failure_threshold, config.breaker.reset_timeout_secs);
    println!("  Model:    {}", config.context.default_model);
    println!("  Audit:    {}", config.audit.backend);
    Ok(())
}

pub fn init(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, StrataConfig::default_toml())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_a_loadable_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        init(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[serving]"));
        StrataConfig::load_from(&path).unwrap();

        std::fs::write(&path, "env = \"custom\"\n").unwrap();
        init(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "env = \"custom\"\n");
    }

    #[test]
    fn validate_rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[breaker]\nfailure_threshold = 0\n").unwrap();
        assert!(validate(&path).is_err());
    }
}
