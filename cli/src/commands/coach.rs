use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::util::{Remote, api_request, parse_json_arg};

#[derive(Subcommand)]
pub enum CoachCommands {
    /// Register a coach
    Register {
        #[arg(long)]
        display_name: String,
        /// trainee | associate | certified | senior | expert
        #[arg(long, default_value = "trainee")]
        level: String,
        #[arg(long, default_value_t = 10)]
        max_caseload: u32,
        #[arg(long, default_value_t = 0)]
        training_hours: u32,
        #[arg(long, default_value_t = 0)]
        supervision_hours: u32,
    },
    /// Check (and optionally apply) the next promotion
    Promotion {
        #[arg(long)]
        coach_id: Uuid,
        #[arg(long)]
        apply: bool,
    },
    /// List open escalations, oldest first
    Escalations,
    /// Move an escalation, e.g. --transition '{"action":"assign","coach_id":"..."}'
    Transition {
        #[arg(long)]
        escalation_id: Uuid,
        #[arg(long)]
        transition: String,
    },
}

pub async fn run(remote: &Remote, command: CoachCommands) -> i32 {
    match command {
        CoachCommands::Register {
            display_name,
            level,
            max_caseload,
            training_hours,
            supervision_hours,
        } => {
            api_request(
                remote,
                reqwest::Method::POST,
                "/v1/coaches",
                Some(json!({
                    "display_name": display_name,
                    "level": level.trim().to_lowercase(),
                    "max_caseload": max_caseload,
                    "training_hours": training_hours,
                    "supervision_hours": supervision_hours
                })),
                &[],
            )
            .await
        }
        CoachCommands::Promotion { coach_id, apply } => {
            api_request(
                remote,
                reqwest::Method::POST,
                &format!("/v1/coaches/{coach_id}/promotion"),
                None,
                &[("apply", apply.to_string())],
            )
            .await
        }
        CoachCommands::Escalations => {
            api_request(remote, reqwest::Method::GET, "/v1/escalations", None, &[]).await
        }
        CoachCommands::Transition {
            escalation_id,
            transition,
        } => {
            let body = parse_json_arg("--transition", &transition);
            api_request(
                remote,
                reqwest::Method::POST,
                &format!("/v1/escalations/{escalation_id}/transition"),
                Some(body),
                &[],
            )
            .await
        }
    }
}
