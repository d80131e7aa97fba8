use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::{config::models::GatewayConfig, core::service::NewService};

/// Prefix of environment variables overlaid on the file, e.g. `KINETIX__AUTH__SECRET`.
pub const ENV_PREFIX: &str = "KINETIX";
/// Extra services to seed, in the `name,url,path;name,url,path` form.
pub const INITIAL_SERVICES_ENV: &str = "KINETIX_INITIAL_SERVICES";

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
}

/// Load configuration from an optional file plus `KINETIX__*` environment variables.
/// Supports YAML, JSON and TOML, chosen by extension.
pub async fn load_config(config_path: Option<&str>) -> Result<GatewayConfig> {
    build_config(config_path, env_source())
}

fn build_config(config_path: Option<&str>, env: Environment) -> Result<GatewayConfig> {
    let mut builder = Config::builder();

    if let Some(config_path) = config_path {
        let path = Path::new(config_path);
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => FileFormat::Json,
            Some("toml") => FileFormat::Toml,
            _ => FileFormat::Yaml,
        };
        builder = builder.add_source(File::new(config_path, format));
    }

    let settings = builder
        .add_source(env)
        .build()
        .with_context(|| format!("Failed to build config from {config_path:?}"))?;

    settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {config_path:?}"))
}

/// Parse `name,url,path;name,url,path`. Empty segments are ignored; malformed ones are
/// logged and skipped. Field validation happens when the services are registered.
pub fn parse_service_list(raw: &str) -> Vec<NewService> {
    raw.split(';')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let fields: Vec<&str> = entry.split(',').map(str::trim).collect();
            match fields.as_slice() {
                [name, url, path] => {
                    tracing::info!("Parsed service: name='{}' url='{}' path='{}'", name, url, path);
                    Some(NewService::new(*name, *url, *path))
                }
                _ => {
                    tracing::error!("Failed to parse entry: '{}'", entry);
                    None
                }
            }
        })
        .collect()
}

/// Services named by `KINETIX_INITIAL_SERVICES`, if set.
pub fn initial_services_from_env() -> Vec<NewService> {
    std::env::var(INITIAL_SERVICES_ENV)
        .map(|raw| parse_service_list(&raw))
        .unwrap_or_default()
}
