use clap::Subcommand;
use serde_json::json;

use crate::util::{Remote, api_request};

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Create a tenant and print its first API key (shown once)
    CreateTenant {
        /// Tenant slug (a-z, 0-9, '-')
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        name: String,
        /// free | standard | enterprise
        #[arg(long, default_value = "free")]
        plan: String,
        /// Features to switch off. Repeatable.
        #[arg(long = "disable")]
        disabled_features: Vec<String>,
    },
}

pub async fn run(remote: &Remote, command: AdminCommands) -> i32 {
    match command {
        AdminCommands::CreateTenant {
            tenant_id,
            name,
            plan,
            disabled_features,
        } => {
            api_request(
                remote,
                reqwest::Method::POST,
                "/v1/admin/tenants",
                Some(json!({
                    "tenant_id": tenant_id,
                    "name": name,
                    "plan": plan.trim().to_lowercase(),
                    "disabled_features": disabled_features
                })),
                &[],
            )
            .await
        }
    }
}
