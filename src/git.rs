use crate::changeset::{ChangeEntry, ChangeStatus, is_yaml};
use crate::{info, warning};
use git2::{Repository, RepositoryOpenFlags, RepositoryState};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git unavailable: {0}")]
    VcsUnavailable(String),

    #[error("base branch '{remote}/{branch}' not found")]
    BaseRefNotFound { remote: String, branch: String },

    #[error("rebase onto {base} failed: {reason}")]
    RebaseFailed { base: String, reason: String },
}

/// how the base branch and HEAD are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CompareMode {
    /// changes since HEAD diverged from the base (`base...HEAD`)
    #[value(name = "triple-dot")]
    AncestorDiff,
    /// tree difference between the base and HEAD (`base..HEAD`)
    #[value(name = "two-dot")]
    DirectDiff,
}

impl CompareMode {
    fn range(self, base: &str) -> String {
        match self {
            Self::AncestorDiff => format!("{base}...HEAD"),
            Self::DirectDiff => format!("{base}..HEAD"),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::AncestorDiff => "triple-dot",
            Self::DirectDiff => "two-dot",
        }
    }
}

/// the remote branch a detection was run against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseRef {
    pub remote: String,
    pub branch: String,
    /// set when the requested branch was missing and an alternate was used
    pub fell_back: bool,
}

impl BaseRef {
    pub fn remote_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }
}

/// result of a change detection
#[derive(Debug)]
pub struct Detection {
    pub base: BaseRef,
    pub entries: Vec<ChangeEntry>,
}

/// a git working tree, driven through the git binary with git2 for inspection
#[derive(Debug)]
pub struct Repo {
    workdir: PathBuf,
    remote: String,
}

impl Repo {
    /// find the repository enclosing `path` (can be anywhere within the repo)
    pub fn discover(path: &Path, remote: &str) -> Result<Self, GitError> {
        // stop the upward search at GIT_CEILING_DIRECTORIES, as git itself does
        let ceilings: Vec<PathBuf> = std::env::var_os("GIT_CEILING_DIRECTORIES")
            .map(|dirs| std::env::split_paths(&dirs).collect())
            .unwrap_or_default();
        let repo = Repository::open_ext(path, RepositoryOpenFlags::empty(), &ceilings)
            .map_err(|e| GitError::VcsUnavailable(format!("not in a git repository: {e}")))?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| GitError::VcsUnavailable("bare repositories are not supported".into()))?
            .to_path_buf();
        Ok(Self {
            workdir,
            remote: remote.to_string(),
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn open(&self) -> Result<Repository, GitError> {
        Repository::open(&self.workdir)
            .map_err(|e| GitError::VcsUnavailable(format!("failed to open git repository: {e}")))
    }

    /// check we're not in the middle of a git operation
    pub fn sanity_check(&self) -> Result<(), GitError> {
        if self.open()?.state() != RepositoryState::Clean {
            return Err(GitError::VcsUnavailable(
                "repository is in the middle of an operation (merge, rebase, etc)".into(),
            ));
        }
        Ok(())
    }

    /// run git in the working tree, returning stdout
    fn git<I, S>(&self, args: I) -> Result<Vec<u8>, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let output = Command::new("git")
            .args(&args)
            .current_dir(&self.workdir)
            .output()
            .map_err(|e| GitError::VcsUnavailable(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let command = args
                .iter()
                .map(|a| a.as_ref().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" ");
            return Err(GitError::VcsUnavailable(format!(
                "git {command} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    /// name of the checked out branch, or "HEAD" when it can't be determined
    pub fn current_branch(&self) -> String {
        self.git(["rev-parse", "--abbrev-ref", "HEAD"])
            .map(|out| String::from_utf8_lossy(&out).trim().to_string())
            .ok()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "HEAD".to_string())
    }

    /// update remote-tracking refs for every remote
    pub fn fetch(&self) -> Result<(), GitError> {
        self.git(["fetch", "--all", "--tags", "--prune", "--quiet"])?;
        Ok(())
    }

    fn has_remote_branch(&self, branch: &str) -> Result<bool, GitError> {
        let repo = self.open()?;
        let name = format!("refs/remotes/{}/{branch}", self.remote);
        Ok(repo.find_reference(&name).is_ok())
    }

    /// resolve the base branch against fetched remote-tracking refs
    pub fn resolve_base(&self, branch: &str, fallback: bool) -> Result<BaseRef, GitError> {
        if self.has_remote_branch(branch)? {
            return Ok(BaseRef {
                remote: self.remote.clone(),
                branch: branch.to_string(),
                fell_back: false,
            });
        }

        if fallback {
            let alternate = alternate_branch(branch);
            if self.has_remote_branch(alternate)? {
                info!(
                    "base branch '{}/{}' not found, falling back to '{}/{}'",
                    self.remote,
                    branch,
                    self.remote,
                    alternate
                );
                return Ok(BaseRef {
                    remote: self.remote.clone(),
                    branch: alternate.to_string(),
                    fell_back: true,
                });
            }
        }

        Err(GitError::BaseRefNotFound {
            remote: self.remote.clone(),
            branch: branch.to_string(),
        })
    }

    /// detect yaml files changed between the base branch and HEAD
    pub fn detect(
        &self,
        base_branch: &str,
        mode: CompareMode,
        scope: Option<&str>,
        fallback: bool,
    ) -> Result<Detection, GitError> {
        self.fetch()?;
        let base = self.resolve_base(base_branch, fallback)?;

        let mut args = vec![
            "diff".to_string(),
            "--name-status".to_string(),
            "-z".to_string(),
            "--find-renames".to_string(),
            "--diff-filter=ACMR".to_string(),
            mode.range(&base.remote_ref()),
            "--".to_string(),
        ];
        args.extend(yaml_pathspecs(scope));

        let output = self.git(&args)?;
        let entries = parse_name_status_z(&output)
            .into_iter()
            .filter(|entry| is_yaml(&entry.path))
            .collect();

        Ok(Detection { base, entries })
    }

    /// rebase the current branch onto the remote base, stashing local changes
    pub fn rebase_onto(&self, base: &BaseRef) -> Result<(), GitError> {
        let target = base.remote_ref();
        self.sanity_check().map_err(|e| GitError::RebaseFailed {
            base: target.clone(),
            reason: e.to_string(),
        })?;

        if let Err(e) = self.git(["-c", "rebase.autoStash=true", "rebase", target.as_str()]) {
            if let Err(abort_err) = self.git(["rebase", "--abort"]) {
                warning!("failed to abort rebase: {}", abort_err);
            }
            return Err(GitError::RebaseFailed {
                base: target,
                reason: e.to_string(),
            });
        }
        Ok(())
    }
}

/// the conventional primary branch to try when `branch` doesn't exist
fn alternate_branch(branch: &str) -> &'static str {
    if branch == "main" { "master" } else { "main" }
}

/// pathspecs limiting a diff to yaml files, optionally below a subdirectory
///
/// extensions match case-insensitively, so `APP.YML` is picked up too
fn yaml_pathspecs(scope: Option<&str>) -> Vec<String> {
    let prefix = scope
        .map(|s| s.trim_end_matches('/'))
        .filter(|s| !s.is_empty() && *s != ".")
        .map(|s| format!("{s}/"))
        .unwrap_or_default();
    vec![
        format!(":(icase){prefix}*.yml"),
        format!(":(icase){prefix}*.yaml"),
    ]
}

/// parse the output of `git diff --name-status -z`
///
/// records are `status NUL path NUL`, or `status NUL old NUL new NUL` for
/// renames and copies, in which case only the new path is kept
fn parse_name_status_z(blob: &[u8]) -> Vec<ChangeEntry> {
    let mut tokens = blob
        .split(|&b| b == 0)
        .map(|t| String::from_utf8_lossy(t).into_owned());
    let mut entries = Vec::new();

    while let Some(token) = tokens.next() {
        if token.is_empty() {
            continue;
        }
        let two_paths = token.starts_with('R') || token.starts_with('C');
        let path = if two_paths {
            let _old = tokens.next();
            tokens.next()
        } else {
            tokens.next()
        };
        // a truncated final record has no path
        let Some(path) = path.filter(|p| !p.is_empty()) else {
            break;
        };
        if let Some(status) = ChangeStatus::from_token(&token) {
            entries.push(ChangeEntry { status, path });
        }
    }

    entries
}
