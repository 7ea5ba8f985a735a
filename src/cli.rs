use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use converge::Phase;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "provision")]
#[command(version)]
#[command(about = "Resumable, idempotent provisioning of a secured multi-service host", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: <config dir>/provision.toml)
    #[arg(short, long, env = "PROVISION_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Deployment identity, overrides `deployment.identity`
    #[arg(short, long, global = true)]
    pub target: Option<String>,

    /// Print machine-readable JSON instead of the terminal summary
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the provisioning phases and verify service health
    Apply(ApplyArgs),

    /// Show what a run would do without changing anything
    Plan(PhaseArgs),

    /// Show the recorded state of the deployment
    Status,

    /// Show generated credentials (masked unless --reveal)
    Secrets(SecretsArgs),

    /// Check that this host can be provisioned
    Doctor,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct PhaseArgs {
    /// Phases to run (comma-separated: install,configure,deploy)
    #[arg(short, long, value_delimiter = ',', default_value = "install,configure,deploy")]
    pub phases: Vec<Phase>,
}

impl PhaseArgs {
    pub fn phase_set(&self) -> BTreeSet<Phase> {
        self.phases.iter().copied().collect()
    }
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub phases: PhaseArgs,

    /// Re-apply a step even if it is recorded as succeeded (repeatable)
    #[arg(long = "force-step", value_name = "STEP")]
    pub force: Vec<String>,

    /// Evaluate the plan without applying anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SecretsArgs {
    /// Print raw values (audited)
    #[arg(long)]
    pub reveal: bool,

    /// Skip the confirmation prompt for --reveal
    #[arg(short, long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_defaults_to_all_phases() {
        let cli = Cli::try_parse_from(["provision", "apply"]).unwrap();
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.phases.phase_set(), Phase::ALL.into_iter().collect());
        assert!(args.force.is_empty());
        assert!(!args.dry_run);
    }

    #[test]
    fn test_apply_phase_list_and_forced_steps() {
        let cli = Cli::try_parse_from([
            "provision",
            "--target",
            "web-1",
            "apply",
            "--phases",
            "configure,deploy",
            "--force-step",
            "ssh.harden",
            "--force-step",
            "render.env",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.target.as_deref(), Some("web-1"));
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(
            args.phases.phase_set(),
            BTreeSet::from([Phase::Configure, Phase::Deploy])
        );
        assert_eq!(args.force, vec!["ssh.harden", "render.env"]);
        assert!(args.dry_run);
    }

    #[test]
    fn test_unknown_phase_rejected() {
        assert!(Cli::try_parse_from(["provision", "plan", "--phases", "teardown"]).is_err());
    }
}
