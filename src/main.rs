//! tf-atlantis-config CLI - Generate Atlantis config for Terraform root modules

use anyhow::{Context, bail};
use camino::Utf8PathBuf;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tf_atlantis_config::options::{DEFAULT_AUTOPLAN_FILE_GLOB, DEFAULT_NUM_EXECUTORS};
use tf_atlantis_config::{GenerateOptions, HclModuleLoader, run};

#[derive(Parser)]
#[command(name = "tf-atlantis-config")]
#[command(author, version, about = "Generate Atlantis config for Terraform root modules")]
struct Cli {
    /// Verbose output (debug logs to stderr)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Make the Atlantis config and print it, or write it to --output
    Generate(GenerateArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// Path to the root directory of the repository (defaults to the current dir)
    #[arg(long)]
    root: Option<Utf8PathBuf>,

    /// Additional directories to scan instead of the root
    #[arg(long = "working-dir")]
    working_dirs: Vec<Utf8PathBuf>,

    /// Path or glob of the directories to scope the config down to
    #[arg(long)]
    filter: Option<String>,

    /// File to write the config to (defaults to stdout)
    #[arg(long)]
    output: Option<Utf8PathBuf>,

    /// Enable autoplan for projects
    #[arg(long)]
    autoplan: bool,

    /// Enable automerge
    #[arg(long)]
    automerge: bool,

    /// Run plans and applies in parallel
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, require_equals = true,
          default_value_t = true, default_missing_value = "true")]
    parallel: bool,

    /// Do not add local module sources to `when_modified`
    #[arg(long)]
    ignore_local_sub_modules: bool,

    /// Local module sources containing any of these strings are not added to `when_modified`
    #[arg(long, value_delimiter = ',')]
    local_sub_modules_exclude: Vec<String>,

    /// Globs of module-local files included in autoplan
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_AUTOPLAN_FILE_GLOB)]
    autoplan_file_list: Vec<String>,

    /// Give every project its own workspace
    #[arg(long)]
    create_workspace: bool,

    /// Give every project a name derived from its directory
    #[arg(long)]
    create_project_name: bool,

    /// Keep workflows from an existing output file
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, require_equals = true,
          default_value_t = true, default_missing_value = "true")]
    preserve_workflows: bool,

    /// Keep projects from an existing output file for incremental builds
    #[arg(long)]
    preserve_projects: bool,

    /// Default workflow for every project; can be overridden by locals
    #[arg(long, default_value = "")]
    workflow: String,

    /// Default apply requirements; can be overridden by locals
    #[arg(long, value_delimiter = ',')]
    apply_requirements: Vec<String>,

    /// Default terraform version; can be overridden by locals
    #[arg(long, default_value = "")]
    terraform_version: String,

    /// Number of projects generated concurrently
    #[arg(long, default_value_t = DEFAULT_NUM_EXECUTORS)]
    num_executors: usize,

    /// Compute execution_order_group for projects
    #[arg(long)]
    execution_order_groups: bool,
}

impl GenerateArgs {
    fn into_options(self) -> anyhow::Result<GenerateOptions> {
        let root = self.root.unwrap_or_else(|| Utf8PathBuf::from("."));
        if !root.exists() {
            bail!("Root directory does not exist: {}", root);
        }
        let base = GenerateOptions::for_root(&root)
            .with_context(|| format!("failed to resolve root directory {}", root))?;

        Ok(GenerateOptions {
            working_dirs: self.working_dirs,
            filter: self.filter,
            output: self.output,
            autoplan: self.autoplan,
            automerge: self.automerge,
            parallel: self.parallel,
            ignore_local_submodules: self.ignore_local_sub_modules,
            local_submodules_exclude: self.local_sub_modules_exclude,
            autoplan_file_list: self.autoplan_file_list,
            create_workspace: self.create_workspace,
            create_project_name: self.create_project_name,
            preserve_workflows: self.preserve_workflows,
            preserve_projects: self.preserve_projects,
            default_workflow: self.workflow,
            default_apply_requirements: self.apply_requirements,
            default_terraform_version: self.terraform_version,
            num_executors: self.num_executors,
            execution_order_groups: self.execution_order_groups,
            ..base
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = execute(cli.command) {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn execute(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Generate(args) => {
            let options = args.into_options()?;
            info!(root = %options.repo_root, "scanning repository");

            if let Some(yaml) = run(&options, &HclModuleLoader)? {
                print!("{}", yaml);
            }
            Ok(())
        }
    }
}
