use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::util::{Remote, api_request};

#[derive(Subcommand)]
pub enum IncentiveCommands {
    /// Record an activity and award points
    Earn {
        #[arg(long)]
        user_id: Uuid,
        /// daily_check_in | task_completed | assessment_completed | session_attended | content_read
        #[arg(long)]
        activity: String,
    },
    /// Spend points on a reward
    Redeem {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        cost: i64,
        #[arg(long)]
        reward: String,
    },
    /// Balance, streak and badges
    Show {
        #[arg(long)]
        user_id: Uuid,
    },
}

pub async fn run(remote: &Remote, command: IncentiveCommands) -> i32 {
    match command {
        IncentiveCommands::Earn { user_id, activity } => {
            api_request(
                remote,
                reqwest::Method::POST,
                &format!("/v1/incentives/{user_id}/activities"),
                Some(json!({ "activity": activity })),
                &[],
            )
            .await
        }
        IncentiveCommands::Redeem {
            user_id,
            cost,
            reward,
        } => {
            api_request(
                remote,
                reqwest::Method::POST,
                &format!("/v1/incentives/{user_id}/redeem"),
                Some(json!({ "cost": cost, "reward": reward })),
                &[],
            )
            .await
        }
        IncentiveCommands::Show { user_id } => {
            api_request(
                remote,
                reqwest::Method::GET,
                &format!("/v1/incentives/{user_id}"),
                None,
                &[],
            )
            .await
        }
    }
}
