//! `ticket2pr`: turn a ticket into a pull request.
//!
//! `ticket2pr run PROJ-123` fetches the ticket, lets an agent plan and
//! implement the change in a scoped workspace, repairs it against lint and
//! test verifiers, and opens a change request. `ticket2pr init` writes the
//! settings file interactively.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::info;

use ticket2pr::context::RunFlags;
use ticket2pr::core::naming::parse_issue_input;
use ticket2pr::error::PipelineError;
use ticket2pr::exit_codes;
use ticket2pr::io::agent;
use ticket2pr::io::backoff::Backoff;
use ticket2pr::io::config::{Settings, resolve_config_path};
use ticket2pr::io::host::GitHubClient;
use ticket2pr::io::http::build_client;
use ticket2pr::io::settings_init::run_init;
use ticket2pr::io::signals::{self, CancelToken, CleanupRegistry};
use ticket2pr::io::ticket::JiraClient;
use ticket2pr::io::verifier::DefaultVerifiers;
use ticket2pr::io::workspace::WorkspaceManager;
use ticket2pr::logging;
use ticket2pr::run::{Collaborators, RunRequest, git_options, run_pipeline};

#[derive(Parser)]
#[command(
    name = "ticket2pr",
    version,
    about = "Turn a Jira ticket into a GitHub pull request with a coding agent"
)]
struct Cli {
    /// Settings file (default: $TICKET2PR_CONFIG, then ~/.ticket2pr/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Solve one ticket and open a change request.
    Run(RunArgs),
    /// Create or update the settings file interactively.
    Init {
        /// Start from defaults instead of the existing settings.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Issue key (PROJ-123) or browse URL.
    issue: String,
    /// Also plan and repair related tests.
    #[arg(short = 't', long)]
    fix_tests: bool,
    /// Use this checkout instead of cloning a temporary one.
    #[arg(short, long)]
    workspace: Option<PathBuf>,
    /// Branch to base the work on and target with the change request.
    #[arg(short, long)]
    base_branch: Option<String>,
    /// Commit with --no-verify.
    #[arg(short, long)]
    commit_no_verify: bool,
    /// MCP configuration handed to the agent backend.
    #[arg(short, long)]
    mcp_config_path: Option<PathBuf>,
}

fn main() {
    if let Err(err) = dotenvy::dotenv()
        && !err.not_found()
    {
        eprintln!("warning: could not load .env: {err}");
    }
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    };
    std::process::exit(code);
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn run(cli: Cli) -> Result<i32, PipelineError> {
    match cli.command {
        Some(Command::Run(args)) => cmd_run(cli.config.as_deref(), args),
        Some(Command::Init { force }) => cmd_init(cli.config.as_deref(), force),
        None => {
            let path = resolve_config_path(cli.config.as_deref(), env_lookup)?;
            if path.exists() {
                Cli::command()
                    .print_help()
                    .map_err(|e| PipelineError::Internal(e.to_string()))?;
                return Ok(exit_codes::OK);
            }
            println!("No settings found, starting first-run setup.");
            cmd_init(Some(&path), false)
        }
    }
}

fn cmd_init(config: Option<&Path>, force: bool) -> Result<i32, PipelineError> {
    let path = resolve_config_path(config, env_lookup)?;
    let existing = if force || !path.exists() {
        None
    } else {
        Some(Settings::load(&path)?)
    };
    let stdin = io::stdin();
    run_init(&path, &mut stdin.lock(), &mut io::stdout(), existing)
        .map_err(|e| PipelineError::Config(format!("{e:#}")))?;
    Ok(exit_codes::OK)
}

fn cmd_run(config: Option<&Path>, args: RunArgs) -> Result<i32, PipelineError> {
    // Bad input fails before settings or any collaborator are touched.
    let key =
        parse_issue_input(&args.issue).map_err(|e| PipelineError::InvalidInput(e.to_string()))?;

    let path = resolve_config_path(config, env_lookup)?;
    let mut settings = Settings::load(&path)?;
    settings.apply_env(env_lookup)?;
    settings.validate()?;
    logging::init(&settings.logging).map_err(|e| PipelineError::internal(&e))?;
    info!(settings = %settings.redacted_summary(), "settings loaded");

    let cancel = CancelToken::new();
    let registry = CleanupRegistry::new();
    signals::install(cancel.clone(), registry.clone()).map_err(|e| PipelineError::internal(&e))?;

    let http = build_client(Duration::from_secs(settings.network.timeout_secs))
        .map_err(|e| PipelineError::internal(&e))?;
    let backoff = Backoff::with_retries(settings.network.max_retries);
    let tickets = JiraClient::new(&settings.jira, http.clone(), backoff.clone());
    let host = GitHubClient::new(&settings.github, http, backoff);
    let backend = agent::from_settings(&settings.agent);
    let verifiers = DefaultVerifiers::new(settings.verifier.clone(), cancel.clone());
    let workspaces = WorkspaceManager::new(
        WorkspaceManager::default_tmp_root(),
        registry,
        git_options(&settings.network, &cancel),
    );

    let request = RunRequest {
        issue: key.clone(),
        workspace: args.workspace,
        base_branch: args.base_branch,
        flags: RunFlags {
            fix_tests: args.fix_tests,
            commit_no_verify: args.commit_no_verify,
        },
        mcp_config_path: args.mcp_config_path,
    };
    let collaborators = Collaborators {
        tickets: &tickets,
        host: &host,
        backend: backend.as_ref(),
        verifiers: &verifiers,
        workspaces: &workspaces,
    };

    println!("Solving {key} with {}", backend.name());
    let report = run_pipeline(&settings, &request, &collaborators, &cancel, |step| {
        println!("==> {step}");
    })?;
    print!("{}", report.render());
    Ok(report.exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_all_flags() {
        let cli = Cli::parse_from([
            "ticket2pr", "run", "PROJ-1", "-t", "-w", "/src/app", "-b", "develop", "-c", "-m",
            "mcp.json",
        ]);
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.issue, "PROJ-1");
        assert!(args.fix_tests);
        assert!(args.commit_no_verify);
        assert_eq!(args.workspace, Some(PathBuf::from("/src/app")));
        assert_eq!(args.base_branch.as_deref(), Some("develop"));
        assert_eq!(args.mcp_config_path, Some(PathBuf::from("mcp.json")));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["ticket2pr", "init", "--force"]);
        assert!(matches!(cli.command, Some(Command::Init { force: true })));
    }

    #[test]
    fn no_subcommand_is_accepted() {
        let cli = Cli::parse_from(["ticket2pr"]);
        assert!(cli.command.is_none());
    }
}
