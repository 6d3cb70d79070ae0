use crate::util::{Remote, api_request};

pub async fn run(remote: &Remote) -> i32 {
    api_request(remote, reqwest::Method::GET, "/health", None, &[]).await
}
