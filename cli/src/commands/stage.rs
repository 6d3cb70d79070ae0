use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::util::{Remote, api_request};

#[derive(Subcommand)]
pub enum StageCommands {
    /// Show a user's stage record
    Get {
        #[arg(long)]
        user_id: Uuid,
    },
    /// Move a user to a stage (one step forward, or back)
    Set {
        #[arg(long)]
        user_id: Uuid,
        /// precontemplation | contemplation | preparation | action | maintenance
        #[arg(long)]
        stage: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

pub async fn run(remote: &Remote, command: StageCommands) -> i32 {
    match command {
        StageCommands::Get { user_id } => {
            api_request(
                remote,
                reqwest::Method::GET,
                &format!("/v1/users/{user_id}/stage"),
                None,
                &[],
            )
            .await
        }
        StageCommands::Set {
            user_id,
            stage,
            reason,
        } => {
            let mut body = json!({ "stage": stage.trim().to_lowercase() });
            if let Some(reason) = reason {
                body["reason"] = json!(reason);
            }
            api_request(
                remote,
                reqwest::Method::POST,
                &format!("/v1/users/{user_id}/stage"),
                Some(body),
                &[],
            )
            .await
        }
    }
}
