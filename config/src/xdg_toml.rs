//! Load the `[env]` table from `~/.config/<app>/config.toml`.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

fn xdg_config_path(app_name: &str) -> Result<Option<PathBuf>, LoadError> {
    let config_dir = if let Ok(base) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(base)
    } else {
        dirs::config_dir().ok_or_else(|| LoadError::XdgPath("no config directory".to_string()))?
    };
    let path = config_dir.join(app_name).join("config.toml");
    Ok(path.is_file().then_some(path))
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Key-value pairs of the `[env]` section. Missing file or section is an
/// empty map.
pub(crate) fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let Some(path) = xdg_config_path(app_name)? else {
        return Ok(HashMap::new());
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    let config: ConfigFile = toml::from_str(&content)?;
    Ok(config.env)
}
