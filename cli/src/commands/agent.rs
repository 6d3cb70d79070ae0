use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::util::{Remote, api_request};

#[derive(Subcommand)]
pub enum AgentCommands {
    /// Send one user message through the agent pipeline
    Send {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        text: String,
        /// Override the stored stage for this turn
        #[arg(long)]
        stage: Option<String>,
    },
}

pub async fn run(remote: &Remote, command: AgentCommands) -> i32 {
    match command {
        AgentCommands::Send {
            user_id,
            text,
            stage,
        } => {
            let mut body = json!({ "user_id": user_id, "text": text });
            if let Some(stage) = stage {
                body["stage"] = json!(stage.trim().to_lowercase());
            }
            api_request(remote, reqwest::Method::POST, "/v1/agent/messages", Some(body), &[]).await
        }
    }
}
