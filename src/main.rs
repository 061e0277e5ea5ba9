use clap::{Parser, Subcommand};
use std::path::PathBuf;

use arxiv_rag::Result;
use arxiv_rag::commands::{
    ask, build_index, chunk, collect, delete_document, embed, ingest, search, show_status,
};
use arxiv_rag::config::{Config, get_config_dir, run_interactive_config, show_config};
use arxiv_rag::server::serve;

#[derive(Parser)]
#[command(name = "arxiv-rag")]
#[command(about = "Retrieval-augmented question answering over arXiv paper abstracts")]
#[command(version)]
struct Cli {
    /// Data directory holding config.toml, metadata.db and the index files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and retrieval settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Filter the arXiv snapshot and load matching papers
    Collect {
        /// Path to the arXiv metadata snapshot (JSON Lines)
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Split loaded abstracts into overlapping chunks
    Chunk,
    /// Generate embeddings for all chunks
    Embed,
    /// Build the search index from generated embeddings
    BuildIndex,
    /// Run collect, chunk, embed and build-index in order
    Ingest {
        /// Path to the arXiv metadata snapshot (JSON Lines)
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Show the chunks most similar to a query
    Search {
        query: String,
        /// Number of results
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
    },
    /// Answer a question from the indexed papers
    Ask {
        query: String,
        /// Number of papers to ground the answer on
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
    },
    /// Start the HTTP server
    Serve,
    /// Show dataset, index and Ollama status
    Status,
    /// Delete a paper and everything derived from it
    Delete {
        /// arXiv id of the paper
        document_id: String,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&data_dir)?;
        } else {
            run_interactive_config(&data_dir)?;
        }
        return Ok(());
    }

    let config = Config::load(&data_dir)?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Collect { snapshot } => {
            collect(&config, snapshot).await?;
        }
        Commands::Chunk => {
            chunk(&config).await?;
        }
        Commands::Embed => {
            embed(&config).await?;
        }
        Commands::BuildIndex => {
            build_index(&config).await?;
        }
        Commands::Ingest { snapshot } => {
            ingest(&config, snapshot).await?;
        }
        Commands::Search { query, top_k } => {
            search(&config, &query, top_k).await?;
        }
        Commands::Ask { query, top_k } => {
            ask(&config, &query, top_k).await?;
        }
        Commands::Serve => {
            serve(&config).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Delete { document_id, yes } => {
            delete_document(&config, &document_id, yes).await?;
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
        let cli = Cli::try_parse_from(["arxiv-rag", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Status));
            assert_eq!(parsed.data_dir, None);
        }
    }

    #[test]
    fn global_data_dir() {
        let cli = Cli::try_parse_from(["arxiv-rag", "chunk", "--data-dir", "/tmp/rag"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Chunk));
            assert_eq!(parsed.data_dir, Some(PathBuf::from("/tmp/rag")));
        }
    }

    #[test]
    fn collect_with_snapshot() {
        let cli = Cli::try_parse_from([
            "arxiv-rag",
            "collect",
            "--snapshot",
            "arxiv-metadata-oai-snapshot.json",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Collect { snapshot } = parsed.command {
                assert_eq!(
                    snapshot,
                    Some(PathBuf::from("arxiv-metadata-oai-snapshot.json"))
                );
            }
        }
    }

    #[test]
    fn ask_with_top_k() {
        let cli = Cli::try_parse_from(["arxiv-rag", "ask", "What is a transformer?", "-k", "5"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ask { query, top_k } = parsed.command {
                assert_eq!(query, "What is a transformer?");
                assert_eq!(top_k, Some(5));
            }
        }
    }

    #[test]
    fn negative_top_k_is_rejected() {
        let cli = Cli::try_parse_from(["arxiv-rag", "search", "graphs", "--top-k", "-1"]);
        assert!(cli.is_err());
    }

    #[test]
    fn build_index_command() {
        let cli = Cli::try_parse_from(["arxiv-rag", "build-index"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::BuildIndex));
        }
    }

    #[test]
    fn delete_requires_document_id() {
        let cli = Cli::try_parse_from(["arxiv-rag", "delete"]);
        assert!(cli.is_err());

        let cli = Cli::try_parse_from(["arxiv-rag", "delete", "2101.00001", "--yes"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Delete { document_id, yes } = parsed.command {
                assert_eq!(document_id, "2101.00001");
                assert!(yes);
            }
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["arxiv-rag", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["arxiv-rag", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["arxiv-rag", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
