use serde_json::json;

/// Connection settings shared by every remote command.
pub struct Remote {
    pub api_url: String,
    pub api_key: Option<String>,
}

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", pretty(&err));
    std::process::exit(4);
}

pub fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Print a locally computed result and return exit code 0.
pub fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_value(value) {
        Ok(v) => {
            println!("{}", pretty(&v));
            0
        }
        Err(e) => {
            eprintln!("{}", pretty(&json!({ "error": "cli_error", "message": e.to_string() })));
            2
        }
    }
}

/// Parse a JSON argument, exiting with a usage error when it is malformed.
pub fn parse_json_arg(flag: &str, raw: &str) -> serde_json::Value {
    serde_json::from_str(raw)
        .unwrap_or_else(|e| exit_error(&format!("Invalid JSON in {flag}: {e}"), None))
}

/// Execute an authenticated API request, print the response, return an exit code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    remote: &Remote,
    method: reqwest::Method,
    path: &str,
    body: Option<serde_json::Value>,
    query: &[(&str, String)],
) -> i32 {
    let url = match reqwest::Url::parse(&format!("{}{path}", remote.api_url)) {
        Ok(mut u) => {
            if !query.is_empty() {
                let mut q = u.query_pairs_mut();
                for (k, v) in query {
                    q.append_pair(k, v);
                }
            }
            u
        }
        Err(e) => {
            let err = json!({
                "error": "cli_error",
                "message": format!("Invalid URL: {}{path}: {e}", remote.api_url)
            });
            eprintln!("{}", pretty(&err));
            return 4;
        }
    };

    tracing::debug!(method = %method, url = %url, "api request");
    let mut req = client().request(method, url);
    if let Some(key) = &remote.api_key {
        req = req.header("Authorization", format!("Bearer {key}"));
    }
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the API server running? Check HAVEN_API_URL."
            });
            eprintln!("{}", pretty(&err));
            return 3;
        }
    };

    let status = resp.status().as_u16();
    let exit_code = exit_code_for(status);
    let resp_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };
    tracing::debug!(status, "api response");

    if exit_code == 0 {
        println!("{}", pretty(&resp_body));
    } else {
        eprintln!("{}", pretty(&resp_body));
    }
    exit_code
}

pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}
