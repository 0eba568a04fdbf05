//! Client for the Kea Control Agent command API.
//!
//! Every request is a JSON command envelope POSTed to the agent's URL. The
//! agent answers with one response envelope per addressed service.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument};

/// Kea result code for a successful command.
pub const RESULT_SUCCESS: i64 = 0;

/// Errors returned by [`KeaClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Control agent returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response to '{command}': {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Empty response to '{0}'")]
    EmptyResponse(String),

    #[error("Command '{command}' failed with result {result}: {text}")]
    Command {
        command: String,
        result: i64,
        text: String,
    },
}

/// A Kea command envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Vec<String>>,
}

impl Command {
    /// Create a command without arguments or service list.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            arguments: None,
            service: None,
        }
    }

    /// Address the command to the given services.
    pub fn with_service<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service = Some(services.into_iter().map(Into::into).collect());
        self
    }

    /// Attach an arguments object.
    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// `config-get` sent to the control agent itself.
    pub fn config_get() -> Self {
        Self::new("config-get")
    }

    /// `statistic-get-all` for one module.
    pub fn statistic_get_all(module: &str) -> Self {
        Self::new("statistic-get-all")
            .with_arguments(Map::new())
            .with_service([module])
    }
}

/// A Kea response envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandResponse {
    pub result: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// The agent answers with an array, except for some agent-level errors.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResponseBody {
    Many(Vec<CommandResponse>),
    One(CommandResponse),
}

/// Decode a raw response body into its envelopes.
pub fn decode_responses(command: &str, body: &str) -> Result<Vec<CommandResponse>, ClientError> {
    let body: ResponseBody = serde_json::from_str(body).map_err(|source| ClientError::Decode {
        command: command.to_string(),
        source,
    })?;

    Ok(match body {
        ResponseBody::Many(responses) => responses,
        ResponseBody::One(response) => vec![response],
    })
}

/// Take the arguments of the first envelope, failing on a non-zero result.
pub fn first_arguments(
    command: &str,
    responses: Vec<CommandResponse>,
) -> Result<Value, ClientError> {
    let response = responses
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::EmptyResponse(command.to_string()))?;

    if response.result != RESULT_SUCCESS {
        return Err(ClientError::Command {
            command: command.to_string(),
            result: response.result,
            text: response.text.unwrap_or_default(),
        });
    }

    Ok(response.arguments.unwrap_or(Value::Null))
}

/// HTTP client for one Kea Control Agent.
#[derive(Debug, Clone)]
pub struct KeaClient {
    client: Client,
    target: String,
}

impl KeaClient {
    /// Create a client for the agent at `target` with a per-request timeout.
    pub fn new(target: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            target: target.into(),
        })
    }

    /// The agent URL.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Send a command and return every response envelope.
    #[instrument(skip(self, command), fields(command = %command.command))]
    pub async fn send(&self, command: &Command) -> Result<Vec<CommandResponse>, ClientError> {
        debug!(target_url = %self.target, service = ?command.service, "Sending command");

        let response = self.client.post(&self.target).json(command).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        decode_responses(&command.command, &body)
    }

    /// Send a command and return the arguments of its first response.
    pub async fn execute(&self, command: &Command) -> Result<Value, ClientError> {
        let responses = self.send(command).await?;
        first_arguments(&command.command, responses)
    }

    /// Fetch the control agent configuration.
    pub async fn config_get(&self) -> Result<Value, ClientError> {
        self.execute(&Command::config_get()).await
    }

    /// Fetch the configuration of one daemon behind the agent.
    pub async fn service_config_get(&self, service: &str) -> Result<Value, ClientError> {
        self.execute(&Command::config_get().with_service([service]))
            .await
    }

    /// Fetch every statistic of one module.
    pub async fn statistic_get_all(&self, module: &str) -> Result<Value, ClientError> {
        self.execute(&Command::statistic_get_all(module)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_get_envelope() {
        let value = serde_json::to_value(Command::config_get()).unwrap();
        assert_eq!(value, json!({ "command": "config-get" }));
    }

    #[test]
    fn test_service_config_get_envelope() {
        let value = serde_json::to_value(Command::config_get().with_service(["dhcp4"])).unwrap();
        assert_eq!(value, json!({ "command": "config-get", "service": ["dhcp4"] }));
    }

    #[test]
    fn test_statistic_get_all_envelope() {
        let value = serde_json::to_value(Command::statistic_get_all("dhcp6")).unwrap();
        assert_eq!(
            value,
            json!({
                "command": "statistic-get-all",
                "arguments": {},
                "service": ["dhcp6"]
            })
        );
    }

    #[test]
    fn test_decode_array() {
        let body = r#"[{"result": 0, "arguments": {"pkt4-received": [[1, "t"]]}}]"#;
        let responses = decode_responses("statistic-get-all", body).unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].result, 0);
        assert!(responses[0].text.is_none());
    }

    #[test]
    fn test_decode_single_object() {
        let body = r#"{"result": 1, "text": "Unable to forward command"}"#;
        let responses = decode_responses("config-get", body).unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].result, 1);
    }

    #[test]
    fn test_decode_malformed() {
        let err = decode_responses("config-get", "<html>").unwrap_err();
        assert!(matches!(err, ClientError::Decode { .. }));
        assert!(err.to_string().contains("config-get"));
    }

    #[test]
    fn test_first_arguments_success() {
        let responses = vec![CommandResponse {
            result: 0,
            text: None,
            arguments: Some(json!({ "a": 1 })),
        }];

        assert_eq!(
            first_arguments("config-get", responses).unwrap(),
            json!({ "a": 1 })
        );
    }

    #[test]
    fn test_first_arguments_missing_is_null() {
        let responses = vec![CommandResponse {
            result: 0,
            text: Some("ok".to_string()),
            arguments: None,
        }];

        assert_eq!(first_arguments("config-get", responses).unwrap(), Value::Null);
    }

    #[test]
    fn test_first_arguments_command_failure() {
        let responses = vec![CommandResponse {
            result: 1,
            text: Some("server is not running".to_string()),
            arguments: None,
        }];

        let err = first_arguments("statistic-get-all", responses).unwrap_err();
        assert!(matches!(err, ClientError::Command { result: 1, .. }));
        assert!(err.to_string().contains("server is not running"));
    }

    #[test]
    fn test_first_arguments_empty() {
        let err = first_arguments("config-get", Vec::new()).unwrap_err();
        assert!(matches!(err, ClientError::EmptyResponse(_)));
    }

    #[test]
    fn test_client_keeps_target() {
        let client = KeaClient::new("http://127.0.0.1:8000", Duration::from_secs(1)).unwrap();
        assert_eq!(client.target(), "http://127.0.0.1:8000");
    }
}
