use camino::Utf8PathBuf;
use color_eyre::eyre::{Context, Result, eyre};
use etcetera::BaseStrategy;
use serde::Deserialize;

/// `{libraries: [{name, type, config}], patterns: [regex...]}`, loaded from
/// YAML. Grounded on `original_source/config.go`'s `Configuration` struct.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub libraries: Vec<LibraryConfig>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LibraryConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
pub struct LocalLibraryConfig {
    pub path: Utf8PathBuf,
}

fn config_dir() -> std::path::PathBuf {
    etcetera::choose_base_strategy()
        .map(|dirs| dirs.config_dir())
        .unwrap_or_else(|_| std::path::PathBuf::from("."))
        .join("moped")
}

pub fn default_config_path() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(config_dir().join("moped.yml"))
        .unwrap_or_else(|_| Utf8PathBuf::from("moped.yml"))
}

pub fn default_state_path() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(config_dir().join("state.yml"))
        .unwrap_or_else(|_| Utf8PathBuf::from("state.yml"))
}

pub fn load_from_file(path: &Utf8PathBuf) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let data =
        std::fs::read_to_string(path).wrap_err_with(|| format!("reading config {path}"))?;
    serde_yaml::from_str(&data).wrap_err_with(|| format!("parsing config {path}"))
}

pub fn compile_patterns(patterns: &[String]) -> Result<Vec<regex::Regex>> {
    patterns
        .iter()
        .map(|p| regex::Regex::new(p).map_err(|e| eyre!("invalid pattern {p:?}: {e}")))
        .collect()
}

/// Builds the Library Registry from a loaded `Config` (spec.md §4.A/4.B):
/// each entry's `kind` selects a backend; `"local"` is the only one
/// built in (an unrecognized `kind` is a startup error, per SPEC_FULL.md
/// §3).
pub fn build_registry(config: &Config) -> Result<crate::library::Registry> {
    let patterns = compile_patterns(&config.patterns)?;
    let mut registry = crate::library::Registry::new();

    for library in &config.libraries {
        match library.kind.as_str() {
            "local" => {
                let local: LocalLibraryConfig = serde_yaml::from_value(library.config.clone())
                    .wrap_err_with(|| format!("library {:?}: invalid local config", library.name))?;
                let backend = crate::library::filesystem::FilesystemBackend::new(
                    local,
                    patterns.clone(),
                )
                .map_err(|e| eyre!("library {:?}: {e}", library.name))?;
                registry.add_library(library.name.clone(), Box::new(backend));
            }
            other => return Err(eyre!("library {:?}: unrecognized kind {other:?}", library.name)),
        }
    }

    Ok(registry)
}
