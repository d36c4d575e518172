use crate::{api::ApiRequest, cli::globals::GlobalArgs};
use anyhow::Result;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub method: Method,
    pub path: String,
    pub json: Option<Value>,
    pub data: Option<String>,
    pub headers: Vec<(String, String)>,
    pub if_none_match: Option<String>,
}

impl Args {
    #[must_use]
    pub fn into_request(self) -> ApiRequest {
        let mut request = ApiRequest::new(self.method, self.path);
        for (name, value) in self.headers {
            request = request.header(name, value);
        }
        if let Some(json) = self.json {
            request = request.json_value(json);
        }
        if let Some(data) = self.data {
            request = request.body(data);
        }
        if let Some(etag) = self.if_none_match {
            request = request.if_none_match(etag);
        }
        request
    }
}

/// Sends the request and prints the body to stdout.
/// # Errors
/// Returns the classified error for non-2xx responses.
pub async fn execute(globals: &GlobalArgs, args: Args) -> Result<()> {
    let client = globals.client()?;
    let response = client.execute(args.into_request()).await?;
    debug!(status = %response.status, attempts = response.attempts, "request completed");

    if response.is_not_modified() {
        eprintln!("304 Not Modified");
        return Ok(());
    }

    match response.json::<Value>() {
        Ok(Value::Null) => {}
        Ok(body) => println!("{}", serde_json::to_string_pretty(&body)?),
        Err(_) => println!("{}", response.text()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_request() {
        let request = Args {
            method: Method::PUT,
            path: "/internal/jobs/1".to_string(),
            json: Some(json!({"name": "sync"})),
            data: None,
            headers: vec![("X-Trace".to_string(), "1".to_string())],
            if_none_match: Some("\"v2\"".to_string()),
        }
        .into_request();

        assert_eq!(request.method, Method::PUT);
        assert_eq!(request.json, Some(json!({"name": "sync"})));
        assert_eq!(request.headers, vec![("X-Trace".to_string(), "1".to_string())]);
        assert_eq!(request.if_none_match.as_deref(), Some("\"v2\""));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_json_and_data_conflict_is_reported_by_validation() {
        let request = Args {
            method: Method::POST,
            path: "/x".to_string(),
            json: Some(json!({})),
            data: Some("raw".to_string()),
            headers: Vec::new(),
            if_none_match: None,
        }
        .into_request();

        assert!(request.validate().is_err());
    }
}
