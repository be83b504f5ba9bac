//! Command-line configuration resolution.

use std::path::PathBuf;

use leafdoc::{EngineConfig, Encoding};

/// Config file looked up in the working directory when `--config` is absent.
const CWD_CONFIG: &str = ".leafdoc/config.json";

/// Flags that override the engine config.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub config: Option<String>,
    pub model: Option<String>,
    pub labels: Option<String>,
    pub knowledge: Option<String>,
    pub encoding: Option<String>,
}

/// Resolve the config file path: explicit flag, `LEAFDOC_CONFIG`, then the working directory.
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(env_path) = std::env::var("LEAFDOC_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    let cwd_config = PathBuf::from(CWD_CONFIG);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    None
}

/// Build the engine config: file, then flags, then environment for unset paths.
pub fn load_engine_config(overrides: &ConfigOverrides) -> anyhow::Result<EngineConfig> {
    let mut config = match resolve_config_path(overrides.config.as_deref()) {
        Some(path) => {
            tracing::debug!("Reading config from {}", path.display());
            EngineConfig::from_file(&path)?
        }
        None => EngineConfig::default(),
    };

    if let Some(model) = &overrides.model {
        config.model_path = Some(model.clone());
    }
    if let Some(labels) = &overrides.labels {
        config.labels_path = Some(labels.clone());
    }
    if let Some(knowledge) = &overrides.knowledge {
        config.knowledge_path = Some(knowledge.clone());
    }
    if let Some(raw) = &overrides.encoding {
        let encoding = Encoding::parse(raw).ok_or_else(|| {
            let names: Vec<&str> = Encoding::ALL.iter().map(|e| e.as_str()).collect();
            anyhow::anyhow!("Unknown encoding '{raw}'. Use one of: {}", names.join(", "))
        })?;
        config.encoding = Some(encoding);
    }

    Ok(config.with_env())
}
