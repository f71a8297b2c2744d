//! `gchat config schema` and `gchat config generate`.
//!
//! The schema is derived from [`AppConfig`], so editors validating
//! `config.toml` see the same sections and defaults the loader applies.
//! The generated example config points at the schema written next to it.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use schemars::Schema;
use schemars::generate::SchemaSettings;
use serde_json::json;

use crate::config::AppConfig;
use crate::{APP_NAME, env_prefix};

/// Generated schema filename.
pub const SCHEMA_FILENAME: &str = "config.schema.json";

/// Generated config filename.
pub const CONFIG_FILENAME: &str = "config.toml";

/// JSON schema for the gchat config file, with `$id` rooted at `repo_url`.
///
/// # Errors
///
/// Returns an error if the schema cannot be rendered as JSON.
pub fn generate_schema(repo_url: &str) -> Result<String> {
    // Taplo and most TOML language servers only understand draft-07.
    let mut schema: Schema = SchemaSettings::draft07()
        .into_generator()
        .into_root_schema_for::<AppConfig>();

    schema.insert(
        "$id".to_string(),
        json!(format!("{repo_url}/schemas/{SCHEMA_FILENAME}")),
    );
    schema.insert("title".to_string(), json!(format!("{APP_NAME} config.toml")));
    schema.insert(
        "description".to_string(),
        json!("Settings for the gchat Google Chat CLI: logging, runtime limits, OAuth2 and API endpoints"),
    );

    // config.toml may carry a top-level `"$schema"` key pointing back here.
    if let Some(props) = schema
        .get_mut("properties")
        .and_then(serde_json::Value::as_object_mut)
    {
        props.insert(
            "$schema".to_string(),
            json!({
                "type": "string",
                "description": "Path or URL of the gchat config schema"
            }),
        );
    }

    serde_json::to_string_pretty(&schema).context("rendering gchat config schema")
}

/// Example `config.toml` holding every default, referencing the schema file
/// written alongside it.
///
/// Client credentials are never written out; the header explains where they
/// come from instead.
///
/// # Errors
///
/// Returns an error if the default config cannot be rendered as TOML.
pub fn generate_example_config() -> Result<String> {
    let defaults =
        toml::to_string_pretty(&AppConfig::default()).context("rendering default gchat config")?;
    let prefix = env_prefix();

    let mut output = String::new();
    writeln!(output, "\"$schema\" = \"./{SCHEMA_FILENAME}\"")?;
    writeln!(output)?;
    writeln!(output, "# gchat configuration.")?;
    writeln!(
        output,
        "# Install as $XDG_CONFIG_HOME/{APP_NAME}/{CONFIG_FILENAME}; any key can be overridden"
    )?;
    writeln!(
        output,
        "# with {prefix}__<SECTION>__<KEY>, e.g. {prefix}__RUNTIME__TIMEOUT=30."
    )?;
    writeln!(
        output,
        "# Set auth.client_id and auth.client_secret (or {prefix}__AUTH__CLIENT_ID and"
    )?;
    writeln!(
        output,
        "# {prefix}__AUTH__CLIENT_SECRET) to use your own OAuth2 client."
    )?;
    writeln!(output)?;
    output.push_str(&defaults);

    Ok(output)
}

/// Write [`SCHEMA_FILENAME`] and [`CONFIG_FILENAME`] into `output_dir`,
/// creating it if needed.
///
/// # Errors
///
/// Returns an error if the directory or either file cannot be written.
pub fn write_generated_files(output_dir: &Path, repo_url: &str) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let schema_path = output_dir.join(SCHEMA_FILENAME);
    fs::write(&schema_path, generate_schema(repo_url)?)
        .with_context(|| format!("writing gchat config schema to {}", schema_path.display()))?;

    let config_path = output_dir.join(CONFIG_FILENAME);
    fs::write(&config_path, generate_example_config()?)
        .with_context(|| format!("writing example gchat config to {}", config_path.display()))?;

    Ok(())
}
