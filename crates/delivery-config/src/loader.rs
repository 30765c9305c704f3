//! Multi-file configuration loading.
//!
//! A configuration file may pull in others with `include = ["a.toml"]` (or a
//! single string). Included tables are merged at the top level; a section
//! defined in two files is an error rather than a silent override.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub struct ConfigLoader {
	/// Directory relative includes are resolved against.
	base_path: PathBuf,
	/// Canonical paths already read, to reject include cycles.
	loaded_files: HashSet<PathBuf>,
	/// Which file defined each top-level section.
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			loaded_files: HashSet::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads a configuration file and all its includes, then validates the result.
	pub async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Config, ConfigError> {
		let config_path = self.resolve_path(config_path)?;
		let mut root = self.load_table(&config_path).await?;

		let includes = match root.remove("include") {
			Some(value) => Self::parse_includes(&value)?,
			None => Vec::new(),
		};
		for key in root.keys() {
			self.section_sources.insert(key.clone(), config_path.clone());
		}

		for include in includes {
			let include_path = self.resolve_path(&include)?;
			let table = self.load_table(&include_path).await?;
			self.merge(&mut root, table, &include_path)?;
		}

		let config: Config = toml::Value::Table(root).try_into()?;
		config.validate()?;
		Ok(config)
	}

	/// Reads a file, resolves environment variables and parses it as a table.
	async fn load_table(&mut self, path: &Path) -> Result<toml::Table, ConfigError> {
		let canonical_path = path.canonicalize().map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;

		if !self.loaded_files.insert(canonical_path.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical_path.display()
			)));
		}

		let content = tokio::fs::read_to_string(path).await?;
		let resolved = resolve_env_vars(&content)?;
		Ok(toml::from_str(&resolved)?)
	}

	fn parse_includes(value: &toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
		match value {
			toml::Value::String(path) => Ok(vec![PathBuf::from(path)]),
			toml::Value::Array(items) => items
				.iter()
				.map(|item| {
					item.as_str().map(PathBuf::from).ok_or_else(|| {
						ConfigError::Validation("Include array must contain only strings".into())
					})
				})
				.collect(),
			_ => Err(ConfigError::Validation(
				"Include must be a string or array of strings".into(),
			)),
		}
	}

	fn merge(
		&mut self,
		root: &mut toml::Table,
		included: toml::Table,
		source: &Path,
	) -> Result<(), ConfigError> {
		for (key, value) in included {
			if key == "include" {
				return Err(ConfigError::Validation(format!(
					"Nested include in {} is not supported",
					source.display()
				)));
			}
			if let Some(existing_source) = self.section_sources.get(&key) {
				return Err(ConfigError::Validation(format!(
					"Duplicate section '{}' found in {} and {}. \
					Each top-level section must be unique across all configuration files.",
					key,
					existing_source.display(),
					source.display()
				)));
			}
			self.section_sources.insert(key.clone(), source.to_path_buf());
			root.insert(key, value);
		}
		Ok(())
	}

	fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_path.join(path)
		};

		if !resolved.exists() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}

		Ok(resolved)
	}
}
