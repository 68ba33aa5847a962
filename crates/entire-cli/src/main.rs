//! `entire` — the hook process entry point.
//!
//! A thin binary: resolve the agent adapter, parse the hook payload from
//! stdin, drive [`OrchestratorContext::handle_event`], and translate the
//! result into an exit code an agent's hook runner can act on. Installing and
//! probing an agent's own hook config is the other half of the surface;
//! everything else (status, rewind, settings) lives outside this entry
//! point.

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use entire_agents::{build_default_registry, Agent, HookInstallContext};
use entire_core::carry_forward::{self, CommitContext};
use entire_core::checkpoint_store::TouchedFile;
use entire_core::{CommitLinkPolicy, Config, EntireError, Event, OrchestratorContext, StateStore, TurnPayload};
use entire_git::GixRepo;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Checkpoint storage for AI coding agent sessions.
///
/// `entire` sits between an agent's hook system and a project's git
/// repository. Each hook invocation is one short-lived process: it reads the
/// agent's JSON payload from stdin, folds it into the session's disposable
/// shadow branch, and exits. Nothing here touches the user's working branch
/// except `hooks commit post-commit`, which links a real commit back to the
/// checkpoint that preceded it.
#[derive(Parser)]
#[command(name = "entire")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one agent hook event, reading its JSON payload from stdin.
    ///
    /// `agent` is a registered adapter name (`claude-code`, `cursor`,
    /// `gemini`, `opencode`, `windsurf`), or the reserved name `commit` for
    /// the carry-forward entry point a repository's own `post-commit` hook
    /// calls.
    Hooks(HooksArgs),

    /// Install entire's hooks into an agent's own hook configuration.
    InstallHooks(InstallHooksArgs),

    /// Remove entire's hooks from an agent's own hook configuration.
    UninstallHooks(AgentArgs),

    /// Report whether entire's hooks are currently installed for an agent.
    HooksInstalled(AgentArgs),
}

#[derive(clap::Args)]
struct HooksArgs {
    /// Registered agent name, or `commit` for the post-commit entry point.
    agent: String,
    /// Hook name, exactly as the agent's own hook config names it.
    hook: String,
}

#[derive(clap::Args)]
struct AgentArgs {
    /// Registered agent name (`claude-code`, `cursor`, `gemini`, `opencode`,
    /// `windsurf`).
    agent: String,
}

#[derive(clap::Args)]
struct InstallHooksArgs {
    #[command(flatten)]
    agent: AgentArgs,

    /// Point the installed hook command at `cargo run -p entire-cli --quiet
    /// --` instead of the released `entire` binary, for developing against
    /// an unreleased build.
    #[arg(long)]
    local_dev: bool,

    /// Overwrite a previously installed hook entry even if it no longer
    /// matches what this version of entire would install.
    #[arg(long)]
    force: bool,
}

fn main() -> std::process::ExitCode {
    init_tracing();
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            if let Some(entire_err) = err.downcast_ref::<EntireError>() {
                if matches!(entire_err, EntireError::Semantic { .. }) {
                    debug!("{entire_err}");
                } else {
                    eprintln!("entire: {entire_err}");
                }
                return std::process::ExitCode::from(entire_err.exit_code() as u8);
            }
            eprintln!("entire: {err:?}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ENTIRE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Hooks(args) => run_hooks(&args),
        Commands::InstallHooks(args) => run_install_hooks(&args),
        Commands::UninstallHooks(args) => run_uninstall_hooks(&args),
        Commands::HooksInstalled(args) => run_hooks_installed(&args),
    }
}

fn open_repo_here() -> Result<GixRepo> {
    let cwd = std::env::current_dir().context("resolving current directory")?;
    GixRepo::open(&cwd).map_err(|err| anyhow!("opening git repository: {err}"))
}

fn worktree_root_of(repo: &GixRepo) -> Result<PathBuf> {
    repo.workdir()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("entire requires a working tree, not a bare repository"))
}

fn run_hooks(args: &HooksArgs) -> Result<()> {
    if args.agent == "commit" {
        return run_commit_hook(&args.hook);
    }

    let mut stdin_bytes = Vec::new();
    std::io::stdin()
        .read_to_end(&mut stdin_bytes)
        .context("reading hook payload from stdin")?;

    let registry = build_default_registry();
    let agent = registry
        .get(&args.agent)
        .ok_or_else(|| anyhow!("unknown agent `{}`", args.agent))?;

    let repo = open_repo_here()?;
    let worktree_root = worktree_root_of(&repo)?;

    // Windsurf's hook stream is its own transcript; every other adapter's
    // default is a no-op since it already maintains a transcript file on
    // disk. Must run before the inert-hook early return below, since a hook
    // this adapter doesn't turn into an `Event` (Windsurf's post_write_code)
    // can still carry a file edit that later hooks need to see.
    agent.capture_hook_payload(&worktree_root, &args.hook, &stdin_bytes)?;

    let Some(event) = agent.parse_hook_event(&args.hook, &stdin_bytes)? else {
        // Recognized-but-inert hook (e.g. Claude Code's PreToolUse), or a
        // hook name this adapter doesn't claim at all.
        return Ok(());
    };

    let state_store = StateStore::open(repo.common_dir()).context("opening session state store")?;
    let config = Config::default();

    let payload = build_turn_payload(agent, &worktree_root, &event, &state_store)?;

    let ctx = OrchestratorContext { repo: &repo, worktree_root, state_store, config };
    ctx.handle_event(event, agent.name(), payload).map_err(Into::into)
}

/// Gather the files touched, transcript delta, and token usage an agent's
/// optional [`entire_agents::TranscriptAnalyzer`]/[`entire_agents::TokenCalculator`]
/// capabilities expose, resuming from the session's last recorded transcript
/// position. Agents with neither capability (a bare [`Agent`] impl) get an
/// empty payload — the state machine still runs, it just has nothing to
/// snapshot beyond the commit it already made to the shadow branch.
fn build_turn_payload(
    agent: &dyn Agent,
    worktree_root: &Path,
    event: &Event,
    state_store: &StateStore,
) -> Result<TurnPayload> {
    let Some(analyzer) = agent.transcript_analyzer() else {
        return Ok(TurnPayload::default());
    };

    let session_id = event.session_id();
    let dir = agent.session_dir(worktree_root);
    let transcript_path = agent.resolve_session_file(&dir, session_id.as_str());
    if !transcript_path.exists() {
        return Ok(TurnPayload::default());
    }

    let from_offset = state_store.read(session_id)?.map_or(0, |s| s.transcript_position);
    let (modified_files, new_position) = analyzer.extract_modified_files(&transcript_path, from_offset)?;
    let summary = analyzer.extract_summary(&transcript_path)?;
    let transcript_bytes = agent.read_transcript(&transcript_path)?;
    let delta = transcript_bytes.get(from_offset as usize..).unwrap_or_default().to_vec();

    let mut files_touched = Vec::with_capacity(modified_files.len());
    for rel_path in modified_files {
        let contents = std::fs::read(worktree_root.join(&rel_path)).unwrap_or_default();
        files_touched.push(TouchedFile { path: rel_path, contents });
    }

    let token_usage = agent
        .token_calculator()
        .and_then(|calc| calc.calculate_token_usage(&transcript_bytes, from_offset));

    Ok(TurnPayload {
        files_touched,
        transcript_delta: delta,
        new_transcript_position: Some(new_position),
        token_usage,
        summary,
    })
}

/// The `entire hooks commit post-commit` entry point: condense any tracked
/// session whose files the just-made commit touched, then amend the commit
/// with an `Entire-Checkpoint:` trailer pointing at the result.
///
/// Only `post-commit` is recognized; any other hook name under the `commit`
/// namespace is a no-op, the same contract [`Agent::parse_hook_event`]
/// follows for hook names an adapter doesn't claim.
fn run_commit_hook(hook_name: &str) -> Result<()> {
    if hook_name != "post-commit" {
        return Ok(());
    }

    let repo = open_repo_here()?;
    let worktree_root = worktree_root_of(&repo)?;
    let state_store = StateStore::open(repo.common_dir()).context("opening session state store")?;
    let config = Config::default();

    let head = repo.rev_parse("HEAD").map_err(|err| anyhow!("resolving HEAD: {err}"))?;
    let commit_info = repo.read_commit(head).map_err(|err| anyhow!("reading HEAD commit: {err}"))?;
    let parent_tree = commit_info
        .parents
        .first()
        .map(|parent| repo.read_commit(*parent))
        .transpose()
        .map_err(|err| anyhow!("reading parent commit: {err}"))?
        .map(|parent| parent.tree_oid);

    let commit = CommitContext {
        tree: commit_info.tree_oid,
        parent_tree,
        message: commit_info.message.clone(),
    };

    // Settings-based overrides of commit-linking policy are out of scope here;
    // `TrailerOnNextCommit` is the only policy this entry point has a reason
    // to run under, since `Never` would make the whole pass a no-op.
    let report =
        carry_forward::run_post_commit(&repo, &state_store, &config, &commit, CommitLinkPolicy::TrailerOnNextCommit)?;
    let Some(checkpoint) = report.checkpoint else {
        return Ok(());
    };

    let amended_message = carry_forward::append_checkpoint_trailer(&commit_info.message, checkpoint.id);
    amend_head_message(&worktree_root, &amended_message)
}

/// Rewrite `HEAD`'s commit message via `git commit --amend`, run as a
/// subprocess the same way `maw push` shells out to `git push` rather than
/// reimplementing it over the object layer — amending the tip of the
/// branch the user is on (possibly moving it) is exactly what `git commit
/// --amend` already does correctly, including updating the ref the
/// symbolic `HEAD` resolves to.
///
/// `--no-verify` is required, not optional: without it the amended commit
/// would re-trigger this repository's own `post-commit` hook.
fn amend_head_message(worktree_root: &Path, message: &str) -> Result<()> {
    let status = Command::new("git")
        .current_dir(worktree_root)
        .args(["commit", "--amend", "--no-verify", "--no-edit", "--quiet", "--message", message])
        .status()
        .context("running git commit --amend")?;
    if !status.success() {
        bail!("git commit --amend exited with status {status}");
    }
    Ok(())
}

fn hook_context(worktree_root: PathBuf, local_dev: bool) -> HookInstallContext {
    let entire_command = if local_dev {
        "cargo run -p entire-cli --quiet --".to_owned()
    } else {
        "entire".to_owned()
    };
    HookInstallContext { worktree_root, entire_command }
}

fn resolve_agent<'r>(registry: &'r entire_agents::AgentRegistry, name: &str) -> Result<&'r dyn Agent> {
    registry.get(name).ok_or_else(|| anyhow!("unknown agent `{name}`"))
}

fn run_install_hooks(args: &InstallHooksArgs) -> Result<()> {
    let registry = build_default_registry();
    let agent = resolve_agent(&registry, &args.agent.agent)?;
    let Some(support) = agent.hook_support() else {
        bail!("{} has no installable hook configuration", agent.display_name());
    };
    let worktree_root = worktree_root_of(&open_repo_here()?)?;
    let ctx = hook_context(worktree_root, args.local_dev);
    let installed = support.install_hooks(&ctx, args.local_dev, args.force)?;
    println!("installed {installed} hook(s) for {}", agent.display_name());
    Ok(())
}

fn run_uninstall_hooks(args: &AgentArgs) -> Result<()> {
    let registry = build_default_registry();
    let agent = resolve_agent(&registry, &args.agent)?;
    let Some(support) = agent.hook_support() else {
        bail!("{} has no installable hook configuration", agent.display_name());
    };
    let worktree_root = worktree_root_of(&open_repo_here()?)?;
    let ctx = hook_context(worktree_root, false);
    support.uninstall_hooks(&ctx)?;
    println!("removed entire's hooks for {}", agent.display_name());
    Ok(())
}

fn run_hooks_installed(args: &AgentArgs) -> Result<()> {
    let registry = build_default_registry();
    let agent = resolve_agent(&registry, &args.agent)?;
    let Some(support) = agent.hook_support() else {
        bail!("{} has no installable hook configuration", agent.display_name());
    };
    let worktree_root = worktree_root_of(&open_repo_here()?)?;
    let ctx = hook_context(worktree_root, false);
    let installed = support.are_hooks_installed(&ctx)?;
    println!("{installed}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_hooks_subcommand() {
        let cli = Cli::try_parse_from(["entire", "hooks", "claude-code", "Stop"]).unwrap();
        match cli.command {
            Commands::Hooks(args) => {
                assert_eq!(args.agent, "claude-code");
                assert_eq!(args.hook, "Stop");
            }
            _ => panic!("expected Hooks"),
        }
    }

    #[test]
    fn cli_parses_install_hooks_flags() {
        let cli =
            Cli::try_parse_from(["entire", "install-hooks", "cursor", "--local-dev", "--force"]).unwrap();
        match cli.command {
            Commands::InstallHooks(args) => {
                assert_eq!(args.agent.agent, "cursor");
                assert!(args.local_dev);
                assert!(args.force);
            }
            _ => panic!("expected InstallHooks"),
        }
    }
}
