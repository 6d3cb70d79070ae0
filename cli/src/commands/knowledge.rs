use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::util::{Remote, api_request};

#[derive(Subcommand)]
pub enum KnowledgeCommands {
    /// Create a draft document
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        #[arg(long)]
        author: String,
        /// Repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Stages the content is written for. Repeatable; omit for all stages.
        #[arg(long = "stage")]
        stages: Vec<String>,
    },
    /// Submit a draft for review and approve it
    Publish {
        #[arg(long)]
        doc_id: Uuid,
    },
    /// Apply one lifecycle action: submit, approve, reject or archive
    Status {
        #[arg(long)]
        doc_id: Uuid,
        #[arg(long)]
        action: String,
    },
    /// Search published passages
    Search {
        #[arg(long)]
        q: String,
        #[arg(long)]
        stage: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
    },
}

pub async fn run(remote: &Remote, command: KnowledgeCommands) -> i32 {
    match command {
        KnowledgeCommands::Create {
            title,
            body,
            author,
            tags,
            stages,
        } => {
            api_request(
                remote,
                reqwest::Method::POST,
                "/v1/knowledge",
                Some(json!({
                    "title": title,
                    "body": body,
                    "author": author,
                    "tags": tags,
                    "stages": stages
                })),
                &[],
            )
            .await
        }
        KnowledgeCommands::Publish { doc_id } => {
            let code = status(remote, doc_id, "submit").await;
            if code != 0 {
                return code;
            }
            status(remote, doc_id, "approve").await
        }
        KnowledgeCommands::Status { doc_id, action } => {
            status(remote, doc_id, &action.trim().to_lowercase()).await
        }
        KnowledgeCommands::Search { q, stage, top_k } => {
            let mut query = vec![("q", q)];
            if let Some(stage) = stage {
                query.push(("stage", stage));
            }
            if let Some(top_k) = top_k {
                query.push(("top_k", top_k.to_string()));
            }
            api_request(remote, reqwest::Method::GET, "/v1/knowledge/search", None, &query).await
        }
    }
}

async fn status(remote: &Remote, doc_id: Uuid, action: &str) -> i32 {
    api_request(
        remote,
        reqwest::Method::POST,
        &format!("/v1/knowledge/{doc_id}/status"),
        Some(json!({ "action": action })),
        &[],
    )
    .await
}
