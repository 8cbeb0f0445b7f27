//! Converge CLI entrypoint.
//!
//! This is the main entrypoint for the converge command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use converge_kit::cli::{Cli, Commands, LifecycleArgs, OutputFormatter};
use converge_kit::config::{
    ConfigParser, ConfigValidator, LoadedDocument, ReconcileConfig, find_config_file,
};
use converge_kit::error::{ConfigError, Result};
use converge_kit::journal::{Journal, LocalJournal, ResourceRecord};
use converge_kit::reconciler::{ReconcileContext, Reconciler};
use converge_kit::schema::ResourceValidator;
use converge_kit::store::HttpStore;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Validate { document, warnings } => {
            cmd_validate(config_path, &document, warnings)
        }
        Commands::Plan {
            document,
            detailed,
            lifecycle,
        } => cmd_plan(config_path, &document, detailed, lifecycle, formatter).await,
        Commands::Apply {
            document,
            yes,
            parallel,
            lifecycle,
        } => cmd_apply(config_path, &document, yes, parallel, lifecycle, formatter).await,
        Commands::History { document, limit } => {
            cmd_history(config_path, &document, limit, formatter).await
        }
    }
}

/// Validate configuration and a resource document.
fn cmd_validate(config_path: Option<&Path>, document: &Path, show_warnings: bool) -> Result<()> {
    let session = Session::load(config_path, document)?;
    info!("Validating {}", session.document.path.display());

    let validator = ConfigValidator::new();
    let config_result = validator.validate(&session.config)?;
    let document_result = validator.validate_document(&session.config, &session.document)?;

    let report = ResourceValidator::new(&session.document.schema).check(&session.document.desired);
    if !report.is_valid() {
        eprint!("{report}");
        return report.into_result().map_err(Into::into);
    }

    eprintln!("Document is valid!");
    if show_warnings {
        let warnings: Vec<&String> = config_result
            .warnings
            .iter()
            .chain(&document_result.warnings)
            .chain(&report.warnings)
            .collect();
        if !warnings.is_empty() {
            eprintln!("\nWarnings:");
            for warning in warnings {
                eprintln!("  - {warning}");
            }
        }
    }

    eprintln!("\nDocument summary:");
    eprintln!("  Kind: {}", session.document.schema.kind);
    eprintln!("  Handle: {}", session.document.handle);
    eprintln!("  Fields set: {}", session.document.desired.fields().len());
    eprintln!("  Fingerprint: {}", session.document.desired.fingerprint());
    Ok(())
}

/// Show what an apply would do.
async fn cmd_plan(
    config_path: Option<&Path>,
    document: &Path,
    detailed: bool,
    lifecycle: LifecycleArgs,
    formatter: &OutputFormatter,
) -> Result<()> {
    let session = Session::load(config_path, document)?;
    session.validate()?;

    let reconciler = session.reconciler(lifecycle, false, CancellationToken::new())?;
    let hint = session.hint().await?;
    let preview = reconciler
        .preview(&session.document.desired, hint.as_ref())
        .await?;

    println!("{}", formatter.format_preview(&preview, detailed));
    Ok(())
}

/// Converge the remote resource to the document.
async fn cmd_apply(
    config_path: Option<&Path>,
    document: &Path,
    auto_approve: bool,
    parallel: bool,
    lifecycle: LifecycleArgs,
    formatter: &OutputFormatter,
) -> Result<()> {
    let session = Session::load(config_path, document)?;
    session.validate()?;

    let cancel = CancellationToken::new();
    let reconciler = session.reconciler(lifecycle, parallel, cancel.clone())?;
    let hint = session.hint().await?;
    let raw = &session.document.desired;

    let preview = reconciler.preview(raw, hint.as_ref()).await?;
    if !preview.plan.is_empty() {
        eprintln!("{}", formatter.format_preview(&preview, true));

        // Confirm
        if !auto_approve {
            eprint!("Do you want to apply this plan? [y/N]: ");
            std::io::stderr().flush()?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            if !input.trim().eq_ignore_ascii_case("y") {
                eprintln!("Apply cancelled.");
                return Ok(());
            }
        }
    }

    watch_for_cancellation(&cancel, session.config.execution.apply_timeout());

    let run_id = Uuid::new_v4();
    info!("Starting apply {run_id}");
    let result = reconciler.apply(raw, hint.as_ref()).await;
    cancel.cancel();

    let mut record = session
        .journal
        .load(&session.document.schema.kind, &session.document.handle)
        .await?
        .unwrap_or_else(|| ResourceRecord::new(&session.document.schema.kind, &session.document.handle));

    match result {
        Ok(outcome) => {
            record.record_success(&session.document.schema, run_id, &outcome);
            session.journal.record(&record).await?;
            println!("{}", formatter.format_outcome(&outcome));
            Ok(())
        }
        Err(e) => {
            record.record_failure(run_id, &e);
            if let Err(journal_error) = session.journal.record(&record).await {
                warn!("Failed to record failed apply: {journal_error}");
            }
            Err(e)
        }
    }
}

/// Show the journal of a resource document.
async fn cmd_history(
    config_path: Option<&Path>,
    document: &Path,
    limit: usize,
    formatter: &OutputFormatter,
) -> Result<()> {
    let session = Session::load(config_path, document)?;

    match session
        .journal
        .load(&session.document.schema.kind, &session.document.handle)
        .await?
    {
        Some(record) => println!("{}", formatter.format_history(&record, limit)),
        None => eprintln!("No journal record for {}.", session.document.handle),
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Cancels `cancel` on Ctrl-C or once `timeout` has passed.
fn watch_for_cancellation(cancel: &CancellationToken, timeout: Option<std::time::Duration>) {
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    warn!("Interrupted; cancelling apply");
                    token.cancel();
                }
            }
        }
    });

    if let Some(timeout) = timeout {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    warn!("Apply timed out after {:?}; cancelling", timeout);
                    token.cancel();
                }
            }
        });
    }
}

/// Configuration, document and journal for one command.
struct Session {
    config: ReconcileConfig,
    document: LoadedDocument,
    journal: LocalJournal,
}

impl Session {
    /// Loads `.env`, the configuration and the resource document.
    fn load(config_path: Option<&Path>, document: &Path) -> Result<Self> {
        let config_file = config_path
            .map(Path::to_path_buf)
            .or_else(|| find_config_file(".").ok());
        let base_dir = config_file
            .as_deref()
            .and_then(Path::parent)
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        debug!("Configuration base directory: {}", base_dir.display());

        let parser = ConfigParser::new().with_base_path(&base_dir);
        parser.load_dotenv()?;
        let config = parser.load_or_default(config_file.as_deref())?;
        let document = parser.load_document(document)?;
        let journal = LocalJournal::with_base_dir(config.journal.directory(&base_dir));

        Ok(Self {
            config,
            document,
            journal,
        })
    }

    /// Validates the configuration and document, logging warnings.
    fn validate(&self) -> Result<()> {
        let validator = ConfigValidator::new();
        let results = [
            validator.validate(&self.config)?,
            validator.validate_document(&self.config, &self.document)?,
        ];
        for warning in results.iter().flat_map(|r| &r.warnings) {
            warn!("{warning}");
        }
        Ok(())
    }

    /// Last converged state from the journal.
    async fn hint(&self) -> Result<Option<converge_kit::resource::Resource>> {
        match self
            .journal
            .load(&self.document.schema.kind, &self.document.handle)
            .await?
        {
            Some(record) => record.hint(&self.document.schema),
            None => Ok(None),
        }
    }

    /// Builds a reconciler talking to the configured HTTP store.
    fn reconciler(
        &self,
        lifecycle: LifecycleArgs,
        parallel: bool,
        cancel: CancellationToken,
    ) -> Result<Reconciler> {
        let remote = &self.config.remote;
        let base_url = remote.base_url.as_deref().ok_or_else(|| {
            ConfigError::validation("A remote base URL is required", "remote.base_url")
        })?;
        let schema = &self.document.schema;
        let collection = remote.collection(&schema.kind)?;

        let mut store = HttpStore::new(base_url, collection, schema.clone(), Some(remote.timeout()))?;
        if let Some(token) = remote.token()? {
            store = store.with_token(token);
        }
        for (name, binding) in &remote.operations {
            store = store.with_operation(name.clone(), binding.clone());
        }

        let execution = &self.config.execution;
        let ctx = ReconcileContext::new(Arc::new(store), Arc::new(schema.clone()))
            .with_policy(lifecycle.apply_to(self.config.lifecycle))
            .with_retry(self.config.retry.to_policy())
            .with_cancellation(cancel)
            .with_call_timeout(execution.operation_timeout())
            .with_parallel_operations(parallel || execution.parallel_operations);
        Ok(Reconciler::new(ctx))
    }
}
