///
/// This module implements the CLI interface for repo-tree: command parsing,
/// argument validation and the async entrypoint.
///
/// All core logic (listing reconstruction, rendering, caching, rate limiting) lives
/// in the [`repo-tree-core`] crate. This module is CLI glue only.
///
/// ## Features
/// - `serve`: run the HTTP service in front of the GitHub API.
/// - `render`: print one repository's tree to stdout and exit.
/// - Async entrypoint [`run`] for programmatic invocation and integration testing.
///
/// [`repo-tree-core`]: ../../repo-tree-core/
use crate::github::GitHubClient;
use crate::load_config::load_config;
use crate::server::serve;
use anyhow::Result;
use clap::{Parser, Subcommand};
use repo_tree_core::service::{TreeRequest, TreeService};
use std::net::SocketAddr;
use std::path::PathBuf;

/// CLI for repo-tree: `tree`-style listings of GitHub repositories.
#[derive(Parser)]
#[clap(
    name = "repo-tree",
    version,
    about = "Render a GitHub repository's file layout as a tree, over HTTP or once on stdout"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve `GET /{owner}/{repo}[/{branch}]` over HTTP
    Serve {
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// Listen address, overriding the config file and LISTEN_ADDR
        #[clap(long)]
        listen: Option<SocketAddr>,
    },
    /// Print a single repository's tree to stdout
    Render {
        owner: String,
        repo: String,
        /// Branch to list; defaults to the repository's default branch
        #[clap(long)]
        branch: Option<String>,
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Serve { config, listen } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(addr) = listen {
                config.listen_addr = addr;
            }
            tracing::info!(command = "serve", listen_addr = %config.listen_addr, "Starting server");
            serve(config).await
        }
        Commands::Render {
            owner,
            repo,
            branch,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let client = GitHubClient::new(&config.github).map_err(|e| anyhow::anyhow!(e))?;
            let service = TreeService::new(client, config.cache_ttl);

            let mut request = TreeRequest::new(owner, repo);
            request.branch = branch;
            tracing::info!(command = "render", owner = %request.owner, repo = %request.repo, "Rendering tree");

            match service.tree(&request).await {
                Ok(outcome) => {
                    print!("{}", outcome.text);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "render", error = %e, "Render failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}
