use std::collections::BTreeMap;

use chrono::Utc;
use clap::Subcommand;
use haven_core::assessments::{AssessmentResponse, InstrumentRegistry};
use serde_json::json;
use uuid::Uuid;

use crate::util::{Remote, api_request, exit_error, print_json};

#[derive(Subcommand)]
pub enum AssessCommands {
    /// Score a completed instrument
    Score {
        /// Instrument code (phq9, gad7, readiness, ...)
        #[arg(long)]
        instrument: String,
        /// Answers as a JSON object, e.g. '{"phq9_1":1,"phq9_2":0}'
        #[arg(long)]
        answers: String,
        /// User the result belongs to (required unless --offline)
        #[arg(long, required_unless_present = "offline")]
        user_id: Option<Uuid>,
        /// Score locally without recording the result
        #[arg(long)]
        offline: bool,
    },
    /// List the built-in instruments
    Instruments,
}

pub async fn run(remote: &Remote, command: AssessCommands) -> i32 {
    match command {
        AssessCommands::Score {
            instrument,
            answers,
            user_id,
            offline,
        } => {
            let answers: BTreeMap<String, u8> = serde_json::from_str(&answers).unwrap_or_else(|e| {
                exit_error(
                    &format!("Invalid --answers: {e}"),
                    Some("Answers are a JSON object of item code to integer value"),
                )
            });
            match (offline, user_id) {
                (false, Some(user_id)) => {
                    api_request(
                        remote,
                        reqwest::Method::POST,
                        "/v1/assessments",
                        Some(json!({
                            "user_id": user_id,
                            "instrument": instrument,
                            "answers": answers
                        })),
                        &[],
                    )
                    .await
                }
                _ => score_offline(instrument, answers),
            }
        }
        AssessCommands::Instruments => {
            let registry = InstrumentRegistry::with_builtins();
            print_json(&registry.codes())
        }
    }
}

fn score_offline(instrument: String, answers: BTreeMap<String, u8>) -> i32 {
    let registry = InstrumentRegistry::with_builtins();
    let response = AssessmentResponse {
        instrument,
        answers,
    };
    match registry.score(&response, Utc::now()) {
        Ok(result) => print_json(&result),
        Err(e) => {
            let err = json!({ "error": "validation_failed", "message": e.to_string() });
            eprintln!("{}", crate::util::pretty(&err));
            1
        }
    }
}
