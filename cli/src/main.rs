use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::admin::AdminCommands;
use commands::agent::AgentCommands;
use commands::assess::AssessCommands;
use commands::coach::CoachCommands;
use commands::incentives::IncentiveCommands;
use commands::knowledge::KnowledgeCommands;
use commands::safety::SafetyCommands;
use commands::stage::StageCommands;
use util::Remote;

#[derive(Parser)]
#[command(
    name = "haven",
    version,
    about = "Haven CLI: safety checks, assessments and coaching workflows"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "HAVEN_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Tenant API key (haven_sk_...)
    #[arg(long, env = "HAVEN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Log requests to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Safety pipeline
    Safety {
        #[command(subcommand)]
        command: SafetyCommands,
    },
    /// Clinical instruments
    Assess {
        #[command(subcommand)]
        command: AssessCommands,
    },
    /// Readiness stage tracking
    Stage {
        #[command(subcommand)]
        command: StageCommands,
    },
    /// Agent conversations
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Knowledge base lifecycle and search
    Knowledge {
        #[command(subcommand)]
        command: KnowledgeCommands,
    },
    /// Points, streaks and badges
    Incentives {
        #[command(subcommand)]
        command: IncentiveCommands,
    },
    /// Coaches and escalation review
    Coach {
        #[command(subcommand)]
        command: CoachCommands,
    },
    /// Tenant provisioning
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "haven_cli=debug".into()),
            )
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }

    let remote = Remote {
        api_url: cli.api_url.trim_end_matches('/').to_string(),
        api_key: cli.api_key,
    };

    let code = match cli.command {
        Commands::Health => commands::health::run(&remote).await,
        Commands::Safety { command } => commands::safety::run(&remote, command).await,
        Commands::Assess { command } => commands::assess::run(&remote, command).await,
        Commands::Stage { command } => commands::stage::run(&remote, command).await,
        Commands::Agent { command } => commands::agent::run(&remote, command).await,
        Commands::Knowledge { command } => commands::knowledge::run(&remote, command).await,
        Commands::Incentives { command } => commands::incentives::run(&remote, command).await,
        Commands::Coach { command } => commands::coach::run(&remote, command).await,
        Commands::Admin { command } => commands::admin::run(&remote, command).await,
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn offline_safety_check_parses_without_api_key() {
        let cli = Cli::try_parse_from([
            "haven", "safety", "check", "--text", "hello", "--offline",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Safety { .. }));
    }

    #[test]
    fn safety_config_requires_offline() {
        let parsed = Cli::try_parse_from([
            "haven", "safety", "check", "--text", "hi", "--config", "rules.json",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn assess_score_needs_user_unless_offline() {
        assert!(
            Cli::try_parse_from([
                "haven", "assess", "score", "--instrument", "phq9", "--answers", "{}",
            ])
            .is_err()
        );
        assert!(
            Cli::try_parse_from([
                "haven", "assess", "score", "--instrument", "phq9", "--answers", "{}", "--offline",
            ])
            .is_ok()
        );
    }
}
