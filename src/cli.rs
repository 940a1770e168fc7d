use crate::constants::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_BASE_BRANCH, DEFAULT_MAX_ATTEMPTS, DEFAULT_REMOTE,
    DEFAULT_TIMEOUT_SECS,
};
use crate::git::CompareMode;
use clap::Parser;
use std::path::PathBuf;

/// yaml-courier: detect changed YAML files, convert them to JSON and POST them to an API
#[derive(Parser, Debug)]
#[command(name = "yaml-courier", version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// destination API URL
    #[arg(long, env = "YAML_COURIER_API_URL")]
    pub api_url: String,

    /// base branch to diff against
    #[arg(long, default_value = DEFAULT_BASE_BRANCH)]
    pub base_branch: String,

    /// remote holding the base branch
    #[arg(long, default_value = DEFAULT_REMOTE)]
    pub remote: String,

    /// diff strategy
    #[arg(long, value_enum, default_value_t = CompareMode::AncestorDiff)]
    pub compare: CompareMode,

    /// limit scanning to a subdirectory of the repository (e.g. configs/)
    #[arg(long)]
    pub include_path: Option<String>,

    /// directory for generated JSON files (default: fresh temp dir)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: f64,

    /// POST attempts per file
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..))]
    pub retries: u32,

    /// exponential backoff factor, waits factor^attempt seconds between attempts
    #[arg(long, default_value_t = DEFAULT_BACKOFF_FACTOR)]
    pub backoff: f64,

    /// TLS verification: true|false|/path/to/ca-bundle.pem
    #[arg(long, env = "YAML_COURIER_VERIFY", default_value = "true")]
    pub verify: String,

    /// extra request header, repeatable (e.g. 'Authorization: Bearer ...')
    #[arg(long = "header", value_name = "NAME: VALUE")]
    pub headers: Vec<String>,

    /// fall back to main/master when the base branch doesn't exist on the remote
    #[arg(long)]
    pub fallback_base: bool,

    /// rebase the current branch onto the remote base branch after posting
    #[arg(long)]
    pub rebase_after: bool,

    /// convert only, don't POST
    #[arg(long)]
    pub dry_run: bool,

    /// print a preview of response bodies in the summary
    #[arg(long)]
    pub show_body: bool,

    /// run as if started in this directory
    #[arg(short = 'C', long = "repo", default_value = ".")]
    pub repo_dir: PathBuf,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
