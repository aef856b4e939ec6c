//! Async client for the ClickUp v2 REST API.
//!
//! One pooled [`reqwest::Client`] per process, authorization header attached
//! at construction. Endpoints carry `team_id` where the workspace requires
//! it (subtask listings in particular return empty without it).

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tracing::warn;

use relay_core::config::ClickUpConfig;

use crate::error::ClickUpError;
use crate::model::Task;

pub struct ClickUpClient {
    http: reqwest::Client,
    base_url: String,
    team_id: Option<String>,
}

impl ClickUpClient {
    /// Build a client from config. Fails fast when no API token is set —
    /// every endpoint requires one.
    pub fn new(config: &ClickUpConfig) -> Result<Self, ClickUpError> {
        let token = config
            .api_token
            .as_deref()
            .ok_or_else(|| ClickUpError::Config("CLICKUP_API_TOKEN is not set".to_string()))?;

        let mut auth = HeaderValue::from_str(token).map_err(|_| {
            ClickUpError::Config("API token contains characters invalid in a header".to_string())
        })?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            team_id: config.team_id.clone(),
        })
    }

    /// Query params shared by task endpoints (`team_id` when configured).
    fn team_params(&self) -> Vec<(&'static str, String)> {
        match &self.team_id {
            Some(team) => vec![("team_id", team.clone())],
            None => Vec::new(),
        }
    }

    /// Fetch a task's details.
    pub async fn get_task(&self, task_id: &str) -> Result<Task, ClickUpError> {
        let url = format!("{}/task/{}", self.base_url, task_id);
        let response = self
            .http
            .get(&url)
            .query(&self.team_params())
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Fetch a task with its subtasks inlined.
    pub async fn get_task_with_subtasks(&self, task_id: &str) -> Result<Task, ClickUpError> {
        let url = format!("{}/task/{}", self.base_url, task_id);
        let mut params = self.team_params();
        params.push(("include_subtasks", "true".to_string()));
        let response = self.http.get(&url).query(&params).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// Update a task's status.
    pub async fn update_status(&self, task_id: &str, status: &str) -> Result<(), ClickUpError> {
        let url = format!("{}/task/{}", self.base_url, task_id);
        let response = self
            .http
            .put(&url)
            .query(&self.team_params())
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// Set a custom field value on a task.
    pub async fn set_custom_field(
        &self,
        task_id: &str,
        field_id: &str,
        value: &Value,
    ) -> Result<(), ClickUpError> {
        let url = format!("{}/task/{}/field/{}", self.base_url, task_id, field_id);
        let response = self
            .http
            .post(&url)
            .query(&self.team_params())
            .json(&serde_json::json!({ "value": value }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

/// Turn non-2xx responses into [`ClickUpError::Api`], capturing the body
/// for the logs.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClickUpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    warn!(url = %url, %status, body = %body, "ClickUp API returned non-2xx status");
    Err(ClickUpError::Api { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: Option<&str>, team: Option<&str>) -> ClickUpConfig {
        ClickUpConfig {
            api_token: token.map(String::from),
            team_id: team.map(String::from),
            base_url: "https://api.clickup.com/api/v2/".to_string(),
            request_timeout_secs: 30,
        }
    }

    #[test]
    fn new_requires_api_token() {
        let result = ClickUpClient::new(&config(None, None));
        assert!(matches!(result, Err(ClickUpError::Config(_))));
    }

    #[test]
    fn new_trims_trailing_slash() {
        let client = ClickUpClient::new(&config(Some("pk_token"), None)).unwrap();
        assert_eq!(client.base_url, "https://api.clickup.com/api/v2");
    }

    #[test]
    fn team_params_reflect_config() {
        let client = ClickUpClient::new(&config(Some("pk_token"), Some("20420318"))).unwrap();
        assert_eq!(
            client.team_params(),
            vec![("team_id", "20420318".to_string())]
        );

        let client = ClickUpClient::new(&config(Some("pk_token"), None)).unwrap();
        assert!(client.team_params().is_empty());
    }

    #[test]
    fn new_rejects_token_with_control_characters() {
        let result = ClickUpClient::new(&config(Some("bad\ntoken"), None));
        assert!(matches!(result, Err(ClickUpError::Config(_))));
    }
}
