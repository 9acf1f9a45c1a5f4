//! HTTP-backed [`AgentInvoker`] -- posts the invocation request as JSON to
//! the configured agent service endpoint.
//!
//! The client carries no request timeout of its own: the retry controller
//! owns the per-attempt deadline, and a second timeout layer here would
//! race it.

use maestro_core::invoke::AgentInvoker;
use maestro_types::invoke::{InvokeError, InvokeRequest};
use serde_json::Value;

/// Invoker calling a remote agent service over HTTP.
pub struct HttpAgentInvoker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAgentInvoker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl AgentInvoker for HttpAgentInvoker {
    async fn invoke(&self, request: &InvokeRequest) -> Result<Value, InvokeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InvokeError::Timeout
                } else {
                    InvokeError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(InvokeError::Service {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| InvokeError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_retained() {
        let invoker = HttpAgentInvoker::new("http://127.0.0.1:8700/invoke");
        assert_eq!(invoker.endpoint(), "http://127.0.0.1:8700/invoke");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        // Port 1 on localhost refuses connections.
        let invoker = HttpAgentInvoker::new("http://127.0.0.1:1/invoke");
        let request = InvokeRequest {
            prompt: "hello".to_string(),
            response_schema: None,
            use_internet_context: false,
        };
        let err = invoker.invoke(&request).await.unwrap_err();
        assert!(matches!(err, InvokeError::Transport(_)));
    }
}
