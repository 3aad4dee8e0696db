//! git-remote-ipfs — git remote helper speaking the ipfs transport.
//!
//! git invokes this binary once per remote interaction:
//!
//! ```bash
//! # clone over ipfs
//! git clone ipfs://$root/repo.git
//!
//! # hack, commit, publish
//! git commit -a -m 'done!'
//! git push origin
//! # => the remote url now points at the new root
//! ```
//!
//! The conversation itself happens over stdin/stdout per the remote-helper
//! protocol; stderr carries diagnostics only.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ipgit_core::{GitRepo, IpfsClient, IpfsPath, Session};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(name = "git-remote-ipfs")]
#[command(author = "IpGit Contributors")]
#[command(version = "0.1.0")]
#[command(about = "git remote helper for repositories hosted on ipfs")]
struct Cli {
    /// Remote name as configured in git (e.g. "origin")
    remote: String,

    /// Remote url: ipfs://<root>/<path> or ipfs:///ipfs/<root>/<path>
    url: String,
}

#[tokio::main]
async fn main() {
    // all logging goes to stderr; stdout belongs to the protocol
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ipgit=info".parse().expect("static directive")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("git-remote-ipfs failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let git_dir = resolve_git_dir().context("locating GIT_DIR")?;
    debug!(git_dir = %git_dir.display(), remote = %cli.remote, url = %cli.url, "session start");

    let remote_path = remote_path_from_url(&cli.url)?;
    let api_addr = std::env::var("IPGIT_IPFS_API")
        .unwrap_or_else(|_| "http://localhost:5001".to_string());
    let default_branch =
        std::env::var("IPGIT_DEFAULT_BRANCH").unwrap_or_else(|_| "master".to_string());

    let api = Arc::new(IpfsClient::new(&api_addr));
    let git = Arc::new(GitRepo::new(git_dir.clone()));

    // interrupt tears the whole process down; in-flight work gets no
    // graceful cancellation
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("interrupted");
            std::process::exit(130);
        }
    });

    let mut session = Session::new(
        api,
        git,
        git_dir,
        cli.remote,
        remote_path,
        default_branch,
    );
    let stdin = std::io::stdin().lock();
    let stdout = std::io::stdout().lock();
    session.speak_git(stdin, stdout).await
}

/// The object store location comes from the environment; the literal
/// `.git` is resolved against the current directory.
fn resolve_git_dir() -> Result<PathBuf> {
    let dir = std::env::var("GIT_DIR").context("GIT_DIR is not set")?;
    if dir == ".git" {
        let cwd = std::env::current_dir().context("reading current directory")?;
        return Ok(cwd.join(".git"));
    }
    Ok(PathBuf::from(dir))
}

/// Reassemble the store path from the url git hands over. The host part of
/// `ipfs://<host>/<path>` is the root identifier; an empty host means the
/// path is already absolute (`ipfs:///ipfs/...`).
fn remote_path_from_url(url: &str) -> Result<IpfsPath> {
    let rest = url
        .strip_prefix("ipfs://")
        .ok_or_else(|| anyhow!("only the ipfs scheme is supported, got {:?}", url))?;
    let candidate = if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/ipfs/{}", rest)
    };
    IpfsPath::parse(&candidate).with_context(|| format!("parsing remote url {:?}", url))
}
