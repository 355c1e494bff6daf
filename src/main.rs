use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rag_chat::commands::{ask, run_chat, run_index, show_status};
use rag_chat::config::{Config, get_config_dir, run_interactive_config, show_config};
use rag_chat::{RagError, Result, logging};

#[derive(Parser)]
#[command(name = "rag-chat")]
#[command(about = "Index plain-text documents and chat with them through a local model")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml (defaults to ~/.rag-chat)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama, the vector store and the documents directory
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Index documents that are not in the vector store yet
    Index {
        /// Override the configured documents directory
        #[arg(long)]
        docs_dir: Option<PathBuf>,
        /// Fail instead of waiting for the vector store and Ollama
        #[arg(long)]
        no_wait: bool,
    },
    /// Start an interactive chat session
    Chat,
    /// Ask a single question
    Ask {
        /// The question to answer
        question: String,
    },
    /// Show connectivity and index status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config_dir = get_config_dir(cli.config_dir.as_deref())
        .map_err(|e| RagError::Config(e.to_string()))?;

    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&config_dir)?;
        } else {
            run_interactive_config(&config_dir)?;
        }
        return Ok(());
    }

    let config = Config::load(&config_dir)?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Index { docs_dir, no_wait } => {
            run_index(&config, docs_dir, !no_wait).await?;
        }
        Commands::Chat => {
            run_chat(&config).await?;
        }
        Commands::Ask { question } => {
            ask(&config, &question).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["rag-chat", "chat"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Chat));
            assert_eq!(parsed.config_dir, None);
        }
    }

    #[test]
    fn index_command_defaults() {
        let cli = Cli::try_parse_from(["rag-chat", "index"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Index { docs_dir, no_wait } = parsed.command {
                assert_eq!(docs_dir, None);
                assert!(!no_wait);
            }
        }
    }

    #[test]
    fn index_command_with_options() {
        let cli = Cli::try_parse_from([
            "rag-chat",
            "index",
            "--docs-dir",
            "/app/docs_augmentation",
            "--no-wait",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Index { docs_dir, no_wait } = parsed.command {
                assert_eq!(docs_dir, Some(PathBuf::from("/app/docs_augmentation")));
                assert!(no_wait);
            }
        }
    }

    #[test]
    fn ask_command_takes_question() {
        let cli = Cli::try_parse_from(["rag-chat", "ask", "Qual é a capital?"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ask { question } = parsed.command {
                assert_eq!(question, "Qual é a capital?");
            }
        }
    }

    #[test]
    fn global_config_dir() {
        let cli = Cli::try_parse_from(["rag-chat", "status", "--config-dir", "/etc/rag-chat"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Status));
            assert_eq!(parsed.config_dir, Some(PathBuf::from("/etc/rag-chat")));
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["rag-chat", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["rag-chat", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["rag-chat", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
