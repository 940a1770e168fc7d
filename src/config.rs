use crate::cli::Cli;
use crate::constants::OUTPUT_DIR_PREFIX;
use crate::delivery::{RetryPolicy, TlsVerify};
use crate::git::CompareMode;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// configuration problems caught before any work begins
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CA bundle not found: {0}")]
    CaBundleNotFound(PathBuf),

    #[error("invalid header '{0}', expected 'Name: value'")]
    InvalidHeader(String),

    #[error("invalid API URL '{0}', expected http:// or https://")]
    InvalidUrl(String),

    #[error("invalid backoff factor {0}, must be finite and non-negative")]
    InvalidBackoff(f64),

    #[error("invalid timeout {0}, must be positive")]
    InvalidTimeout(f64),

    #[error("unusable output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// everything a run needs, resolved once at startup
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunConfig {
    pub api_url: String,
    pub base_branch: String,
    pub remote: String,
    pub compare: CompareMode,
    pub include_path: Option<String>,
    pub output_dir: PathBuf,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub verify: TlsVerify,
    pub headers: Vec<(String, String)>,
    pub fallback_base: bool,
    pub rebase_after: bool,
    pub dry_run: bool,
    pub show_body: bool,
    pub repo_dir: PathBuf,
}

impl RunConfig {
    /// validate cli arguments and prepare the output directory
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let verify = TlsVerify::parse(&cli.verify);
        if let TlsVerify::CaBundle(path) = &verify
            && !path.exists()
        {
            return Err(ConfigError::CaBundleNotFound(path.clone()));
        }

        let api_url = cli.api_url.trim().to_string();
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(api_url));
        }

        if !cli.backoff.is_finite() || cli.backoff < 0.0 {
            return Err(ConfigError::InvalidBackoff(cli.backoff));
        }
        let timeout = Duration::try_from_secs_f64(cli.timeout)
            .ok()
            .filter(|t| !t.is_zero())
            .ok_or(ConfigError::InvalidTimeout(cli.timeout))?;

        let headers = cli
            .headers
            .iter()
            .map(|h| parse_header(h))
            .collect::<Result<Vec<_>, _>>()?;

        let output_dir = prepare_output_dir(cli.output_dir)?;

        Ok(Self {
            api_url,
            base_branch: cli.base_branch,
            remote: cli.remote,
            compare: cli.compare,
            include_path: cli.include_path.filter(|p| !p.trim().is_empty()),
            output_dir,
            timeout,
            retry: RetryPolicy {
                max_attempts: cli.retries,
                backoff_factor: cli.backoff,
            },
            verify,
            headers,
            fallback_base: cli.fallback_base,
            rebase_after: cli.rebase_after,
            dry_run: cli.dry_run,
            show_body: cli.show_body,
            repo_dir: cli.repo_dir,
        })
    }
}

/// split `Name: value` into a header pair
fn parse_header(raw: &str) -> Result<(String, String), ConfigError> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| ConfigError::InvalidHeader(raw.to_string()))?;
    let name = name.trim();
    let valid_name = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if !valid_name {
        return Err(ConfigError::InvalidHeader(raw.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// create the requested output directory, or a fresh temp dir that outlives the run
fn prepare_output_dir(requested: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match requested {
        Some(path) => {
            fs::create_dir_all(&path).map_err(|source| ConfigError::OutputDir {
                path: path.clone(),
                source,
            })?;
            Ok(path)
        }
        None => tempfile::Builder::new()
            .prefix(OUTPUT_DIR_PREFIX)
            .tempdir()
            .map(tempfile::TempDir::keep)
            .map_err(|source| ConfigError::OutputDir {
                path: std::env::temp_dir(),
                source,
            }),
    }
}
