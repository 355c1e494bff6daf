use super::*;
use std::path::{Path, PathBuf};

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn partial_config_with_defaults() {
        let partial_toml = r#"
            [ollama]
            host = "ollama"

            [vector_store]
            elasticsearch_url = "http://elasticsearch:9200"

            [indexer]
            docs_dir = "/app/docs_augmentation"
        "#;

        let config: Config = toml::from_str(partial_toml).expect("partial config should parse");
        assert_eq!(config.ollama.host, "ollama");
        assert_eq!(config.ollama.port, 11434);
        assert_eq!(
            config.vector_store.elasticsearch_url,
            "http://elasticsearch:9200"
        );
        assert_eq!(config.vector_store.index, IndexSchema::default());
        assert_eq!(
            config.indexer.docs_dir,
            PathBuf::from("/app/docs_augmentation")
        );
        assert_eq!(config.indexer.extension, "txt");
        assert_eq!(config.chat.top_k, 4);
    }

    #[test]
    fn config_validation_edge_cases() {
        let config = Config {
            ollama: OllamaConfig {
                host: String::new(),
                port: 80,
                ..OllamaConfig::default()
            },
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.is_err()); // Empty host should be invalid
    }

    #[test]
    fn ollama_url_generation_with_different_hosts() {
        let configs = vec![
            ("http", "localhost", 11434, "http://localhost:11434/"),
            ("http", "127.0.0.1", 8080, "http://127.0.0.1:8080/"),
            ("http", "ollama", 11434, "http://ollama:11434/"),
            (
                "https",
                "secure.example.com",
                443,
                "https://secure.example.com/",
            ),
        ];

        for (protocol, host, port, expected_url) in configs {
            let config = Config {
                ollama: OllamaConfig {
                    protocol: protocol.to_string(),
                    host: host.to_string(),
                    port,
                    ..OllamaConfig::default()
                },
                ..Config::default()
            };

            let url = config.ollama_url().expect("ollama_url is ok");
            assert_eq!(url.as_str(), expected_url);
        }
    }

    #[test]
    fn interaction_endpoint_checked_only_when_enabled() {
        let mut config = Config::default();
        config.interaction_log.endpoint = "not a url".to_string();
        assert!(config.validate().is_ok());

        config.interaction_log.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_dir_override() {
        let dir = get_config_dir(Some(Path::new("/tmp/rag-chat-test")))
            .expect("override should resolve");
        assert_eq!(dir, PathBuf::from("/tmp/rag-chat-test"));
    }

    #[test]
    fn error_display_messages() {
        let errors = vec![
            ConfigError::InvalidProtocol("ftp".to_string()),
            ConfigError::InvalidPort(0),
            ConfigError::InvalidBatchSize(0),
            ConfigError::InvalidModel(String::new()),
            ConfigError::InvalidUrl("invalid-url".to_string()),
            ConfigError::OverlapTooLarge(600, 500),
            ConfigError::InvalidIndexName("Bad Name".to_string()),
        ];

        for error in errors {
            let message = format!("{error}");
            assert!(!message.is_empty());
            assert!(message.len() > 10); // Ensure meaningful error messages
        }
    }
}
