// Configuration management module
// Shared TOML configuration for the indexer and the chat service

pub mod interactive;
pub mod settings;

#[cfg(test)]
mod tests;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    ChatConfig, Config, ConfigError, IndexSchema, IndexerConfig, InteractionLogConfig,
    OllamaConfig, StoreBackend, VectorStoreConfig,
};

/// Resolve the configuration directory, honouring an explicit override
#[inline]
pub fn get_config_dir(
    override_dir: Option<&std::path::Path>,
) -> Result<std::path::PathBuf, ConfigError> {
    override_dir.map_or_else(Config::default_dir, |dir| Ok(dir.to_path_buf()))
}
