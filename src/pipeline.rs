use crate::changeset::ChangeEntry;
use crate::config::RunConfig;
use crate::convert::Converter;
use crate::delivery::{DeliveryClient, DeliveryOutcome, Transport};
use crate::git::{BaseRef, GitError, Repo};
use crate::{error, info, status, warning};

/// what happened to a single changed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// converted, not sent
    DryRun,
    Delivered(DeliveryOutcome),
    /// listed as changed but not present in the working tree
    Skipped(String),
    /// conversion failed, or the payload couldn't be read back
    Error(String),
}

impl FileOutcome {
    pub fn is_failure(&self) -> bool {
        match self {
            Self::Delivered(outcome) => !outcome.is_success(),
            Self::Error(_) => true,
            Self::DryRun | Self::Skipped(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResult {
    pub source_path: String,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    Succeeded,
    Failed(String),
}

/// end state of a run, in detection order
#[derive(Debug, Default)]
pub struct RunSummary {
    pub base: Option<BaseRef>,
    pub results: Vec<FileResult>,
    pub failure_count: usize,
    pub rebase: Option<RebaseOutcome>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }
}

/// detect → convert → deliver, once per run
pub struct Pipeline<T> {
    config: RunConfig,
    repo: Repo,
    converter: Converter,
    client: DeliveryClient<T>,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(config: RunConfig, repo: Repo, transport: T) -> Self {
        let converter = Converter::new(&config.output_dir);
        let client = DeliveryClient::new(transport, config.retry, &config.headers);
        Self {
            config,
            repo,
            converter,
            client,
        }
    }

    /// run the whole pipeline
    ///
    /// only detection errors are returned, everything per-file ends up in the summary
    pub fn run(&self) -> Result<RunSummary, GitError> {
        status!(
            "branch: {} | base: {}/{} | compare: {}",
            self.repo.current_branch(),
            self.config.remote,
            self.config.base_branch,
            self.config.compare.name()
        );

        let detection = self.repo.detect(
            &self.config.base_branch,
            self.config.compare,
            self.config.include_path.as_deref(),
            self.config.fallback_base,
        )?;

        let mut summary = if detection.entries.is_empty() {
            status!("no new or modified YAML files found");
            RunSummary::default()
        } else {
            let count = detection.entries.len();
            status!(
                "found {} YAML {} to process",
                count,
                if count == 1 { "file" } else { "files" }
            );
            for entry in &detection.entries {
                info!("{} {}", entry.status.as_char(), entry.path);
            }
            self.process(&detection.entries)
        };

        if self.config.rebase_after && !self.config.dry_run {
            self.rebase(&detection.base, &mut summary);
        }
        summary.base = Some(detection.base);

        Ok(summary)
    }

    /// convert and deliver each entry in order
    pub fn process(&self, entries: &[ChangeEntry]) -> RunSummary {
        let mut summary = RunSummary::default();
        for entry in entries {
            let outcome = self.process_file(entry);
            if outcome.is_failure() {
                summary.failure_count += 1;
            }
            summary.results.push(FileResult {
                source_path: entry.path.clone(),
                outcome,
            });
        }
        summary
    }

    fn process_file(&self, entry: &ChangeEntry) -> FileOutcome {
        let root = self.repo.workdir();
        if !root.join(&entry.path).exists() {
            warning!("skipping missing file (deleted or renamed?): {}", entry.path);
            return FileOutcome::Skipped("missing from working tree".to_string());
        }

        let conversion = match self.converter.convert(root, &entry.path) {
            Ok(conversion) => conversion,
            Err(e) => {
                error!("{}", e);
                return FileOutcome::Error(e.to_string());
            }
        };
        status!(
            "converted '{}' → '{}'",
            conversion.source_path,
            conversion.json_path.display()
        );

        if self.config.dry_run {
            info!(
                "dry-run: would POST {} → {}",
                conversion.json_path.display(),
                self.config.api_url
            );
            return FileOutcome::DryRun;
        }

        match self.client.post(&self.config.api_url, &conversion.json_path) {
            Ok(outcome) => {
                match outcome.status {
                    Some(code) => info!("HTTP {} for {}", code, entry.path),
                    None => error!("no response for {}", entry.path),
                }
                FileOutcome::Delivered(outcome)
            }
            Err(e) => {
                error!("{}", e);
                FileOutcome::Error(e.to_string())
            }
        }
    }

    fn rebase(&self, base: &BaseRef, summary: &mut RunSummary) {
        status!("rebasing onto {}...", base.remote_ref());
        match self.repo.rebase_onto(base) {
            Ok(()) => {
                status!("rebased successfully");
                summary.rebase = Some(RebaseOutcome::Succeeded);
            }
            Err(e) => {
                error!("{}", e);
                summary.failure_count += 1;
                summary.rebase = Some(RebaseOutcome::Failed(e.to_string()));
            }
        }
    }
}
