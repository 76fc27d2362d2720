use super::PipelineConfig;
use crate::error::{PipelineError, Result};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// File picked up from the current directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "groupsum.toml";

/// Load configuration from an explicit file, or `groupsum.toml` if present
///
/// An explicit path must exist; the default file is optional. Environment
/// overrides are applied on top of whatever the file provided.
pub async fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match explicit {
        Some(path) => read_config_file(path).await?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if fs::try_exists(default_path).await.unwrap_or(false) {
                read_config_file(default_path).await?
            } else {
                PipelineConfig::default()
            }
        }
    };

    config.merge_env_vars()?;
    Ok(config)
}

async fn read_config_file(path: &Path) -> Result<PipelineConfig> {
    debug!("Loading configuration from {}", path.display());
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;

    toml::from_str(&content).map_err(|e| PipelineError::InvalidConfiguration {
        field: path.display().to_string(),
        reason: e.to_string(),
    })
}
