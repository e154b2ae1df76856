use std::panic;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use codejudge::config::JudgeConfig;
use codejudge::core::domain::{CaseResult, Status, Submission};
use codejudge::core::orchestrator::{Orchestrator, RunRequest, SubmitRequest};
use codejudge::core::pool::SandboxPool;
use codejudge::core::traits::sandbox::{ExecutionOutcome, Sandbox, Termination};
use codejudge::native::sandbox::ProcessSandbox;
use codejudge::stubs::sandbox::SandboxStub;
use codejudge::stubs::store::{InMemoryProblemStore, InMemorySubmissionStore};

#[derive(Parser)]
#[command(name = "codejudge")]
#[command(about = "Run and judge solutions locally", long_about = None)]
struct Cli {
    /// Execution backend
    #[arg(long, value_enum, default_value = "native")]
    backend: Backend,

    /// Identity the request is made as
    #[arg(short, long, default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Native,
    /// Answers every run with "Hello World" after a second
    Stub,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a source file once and print what it wrote
    Run {
        /// Source file to execute
        file: PathBuf,

        /// Language (inferred from the file extension when omitted)
        #[arg(short, long)]
        language: Option<String>,

        /// Text passed on stdin
        #[arg(short, long, conflicts_with = "input_file")]
        input: Option<String>,

        /// File passed on stdin
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Problem directory whose first sample is used when no input is given
        #[arg(short, long)]
        problem: Option<PathBuf>,
    },

    /// Judge a source file against a problem directory
    Submit {
        /// Source file to judge
        file: PathBuf,

        /// Problem directory with sample/ and hidden/ cases
        #[arg(short, long)]
        problem: PathBuf,

        /// Language (inferred from the file extension when omitted)
        #[arg(short, long)]
        language: Option<String>,

        /// Check against the sample cases only
        #[arg(long)]
        samples: bool,
    },
}

#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let cli = Cli::parse();
    let config = JudgeConfig::from_env()?;

    let sandbox: Arc<dyn Sandbox> = match cli.backend {
        Backend::Native => Arc::new(ProcessSandbox::new(
            &config.work_dir,
            config.toolchain.clone(),
        )),
        Backend::Stub => Arc::new(SandboxStub::new(
            Ok(ExecutionOutcome::exited(0, "Hello World\n", "")),
            Duration::from_secs(1),
        )),
    };
    let problems = Arc::new(InMemoryProblemStore::new());
    let orchestrator = Orchestrator::new(
        SandboxPool::new(sandbox, config.pool_settings()),
        problems.clone(),
        Arc::new(InMemorySubmissionStore::new()),
        config.judge_settings(),
    );
    tracing::info!(
        pool_size = config.pool_size,
        work_dir = %config.work_dir.display(),
        "Judge ready"
    );

    match cli.command {
        Commands::Run {
            file,
            language,
            input,
            input_file,
            problem,
        } => {
            let input = match (input, input_file) {
                (Some(input), _) => Some(input),
                (None, Some(path)) => Some(read(&path).await?),
                (None, None) => None,
            };
            let problem = match problem {
                Some(dir) => Some(load_problem(&problems, &dir).await?),
                None => None,
            };
            let request = RunRequest {
                user: cli.user,
                language: language_for(&file, language)?,
                source: read(&file).await?,
                input,
                problem,
            };

            let cancel = CancellationToken::new();
            let interrupt = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                })
            };
            let outcome = orchestrator.run_cancellable(request, &cancel).await;
            interrupt.abort();

            let outcome = outcome?;
            print!("{}", outcome.stdout);
            eprint!("{}", outcome.stderr);
            eprintln!(
                "[{}] {}ms",
                describe(&outcome.termination),
                outcome.elapsed_ms
            );
            Ok(if outcome.is_clean_exit() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Submit {
            file,
            problem,
            language,
            samples,
        } => {
            let request = SubmitRequest {
                user: cli.user,
                problem: load_problem(&problems, &problem).await?,
                language: language_for(&file, language)?,
                source: read(&file).await?,
            };

            if samples {
                let results = orchestrator.check_samples(request).await?;
                results.iter().for_each(print_case);
                let passed = results.iter().all(|r| r.verdict.is_passed());
                return Ok(if passed {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                });
            }

            let submission = judge(&orchestrator, request).await?;
            print_submission(&submission);
            Ok(if submission.status == Status::Accepted {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Judges on a background task so Ctrl-C can cancel the submission.
async fn judge(orchestrator: &Orchestrator, request: SubmitRequest) -> Result<Submission> {
    let mut handle = orchestrator.submit_detached(request).await?;
    loop {
        tokio::select! {
            update = handle.updates.next() => match update {
                Some(snapshot) => tracing::info!(id = %snapshot.id, status = %snapshot.status, "Submission update"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel(&handle.id);
            }
        }
    }
    Ok(handle.task.await??)
}

async fn load_problem(problems: &InMemoryProblemStore, dir: &Path) -> Result<String> {
    let id = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "problem".to_string());
    problems
        .load_dir(id.clone(), dir)
        .await
        .with_context(|| format!("failed to load problem from {}", dir.display()))?;
    Ok(id)
}

async fn read(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

fn language_for(file: &Path, language: Option<String>) -> Result<String> {
    if let Some(language) = language {
        return Ok(language);
    }
    let language = match file.extension().and_then(|ext| ext.to_str()) {
        Some("py") => "python",
        Some("js") | Some("mjs") => "javascript",
        Some("java") => "java",
        Some("cpp") | Some("cc") | Some("cxx") => "cpp",
        _ => anyhow::bail!(
            "cannot infer the language of {}, pass --language",
            file.display()
        ),
    };
    Ok(language.to_string())
}

fn describe(termination: &Termination) -> String {
    match termination {
        Termination::Exited(code) => format!("exit {}", code),
        Termination::Signaled(signal) => format!("signal {}", signal),
        Termination::CompileFailed => "compilation failed".to_string(),
        Termination::LimitExceeded(kind) => kind.marker().to_string(),
        Termination::Internal => "internal error".to_string(),
    }
}

fn print_case(result: &CaseResult) {
    println!(
        "case {:>3}  {:<20} {}ms",
        result.index + 1,
        result.verdict.to_string(),
        result.elapsed_ms
    );
    if let Some(error) = &result.error {
        println!("          {}", error.replace('\n', "\n          "));
    }
    if let (Some(actual), Some(expected)) = (&result.actual_output, &result.expected_output) {
        if !result.verdict.is_passed() {
            println!("          expected: {:?}", expected);
            println!("          actual:   {:?}", actual);
        }
    }
}

fn print_submission(submission: &Submission) {
    submission.results.iter().for_each(print_case);
    println!(
        "{}  ({}/{} cases judged)",
        submission.status,
        submission.results.len(),
        submission.case_count
    );
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
