use clap::Subcommand;
use haven_core::safety::{Direction, SafetyConfig, SafetyPipeline};
use serde_json::json;

use crate::util::{Remote, api_request, exit_error, print_json};

#[derive(Subcommand)]
pub enum SafetyCommands {
    /// Run text through the safety pipeline
    Check {
        /// Text to evaluate
        #[arg(long)]
        text: String,
        /// Treat the text as agent output instead of user input
        #[arg(long)]
        outbound: bool,
        /// Evaluate locally with the core pipeline instead of calling the API
        #[arg(long)]
        offline: bool,
        /// JSON safety config for offline runs (default: built-in rules)
        #[arg(long, requires = "offline")]
        config: Option<String>,
    },
}

pub async fn run(remote: &Remote, command: SafetyCommands) -> i32 {
    match command {
        SafetyCommands::Check {
            text,
            outbound,
            offline,
            config,
        } => {
            let direction = if outbound {
                Direction::Outbound
            } else {
                Direction::Inbound
            };
            if offline {
                check_offline(&text, direction, config.as_deref())
            } else {
                api_request(
                    remote,
                    reqwest::Method::POST,
                    "/v1/safety/check",
                    Some(json!({ "text": text, "direction": direction })),
                    &[],
                )
                .await
            }
        }
    }
}

fn check_offline(text: &str, direction: Direction, config_path: Option<&str>) -> i32 {
    let config = match config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .unwrap_or_else(|e| exit_error(&format!("Failed to read '{path}': {e}"), None));
            SafetyConfig::from_json(&raw).unwrap_or_else(|e| exit_error(&e.to_string(), None))
        }
        None => SafetyConfig::default(),
    };
    let pipeline = SafetyPipeline::new(config).unwrap_or_else(|e| {
        exit_error(
            &e.to_string(),
            Some("Keyword patterns in the config must be valid regular expressions"),
        )
    });
    print_json(&pipeline.evaluate(text, direction, None))
}
