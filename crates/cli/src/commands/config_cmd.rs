//! `matilda config`: Configuration management commands.

use matilda_config::AppConfig;

const REDACTED: &str = "[REDACTED]";

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&redacted(config))?;
    println!("{toml_str}");
    Ok(())
}

pub async fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() && !force {
        println!("  Config already exists: {}", config_path.display());
        println!("  Use --force to overwrite it.");
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("  Wrote {}", config_path.display());
    println!("  Set TOGETHER_API_KEY (or edit the file) to enable replies.");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

/// Replace every API key with a marker.
fn redacted(mut config: AppConfig) -> AppConfig {
    let mask = |key: &mut Option<String>| {
        if key.is_some() {
            *key = Some(REDACTED.into());
        }
    };
    for entry in &mut config.providers {
        mask(&mut entry.api_key);
    }
    mask(&mut config.images.openai_api_key);
    mask(&mut config.images.together_api_key);
    mask(&mut config.images.stability_api_key);
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use matilda_config::ProviderEntry;

    #[test]
    fn keys_are_masked() {
        let mut config = AppConfig::default();
        let mut entry = ProviderEntry::together();
        entry.api_key = Some("secret-1".into());
        config.providers.push(entry);
        config.images.stability_api_key = Some("secret-2".into());

        let out = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!out.contains("secret-1"));
        assert!(!out.contains("secret-2"));
        assert!(out.contains(REDACTED));
    }
}
