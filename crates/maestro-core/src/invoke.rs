//! AgentInvoker trait definition.
//!
//! The language-model invocation service is consumed as an opaque
//! asynchronous call. Implementations live in `maestro-infra` (HTTP) and in
//! test code (scripted). Uses native async fn in traits (RPITIT).

use maestro_types::invoke::{InvokeError, InvokeRequest};
use serde_json::Value;

/// The external agent invocation boundary.
///
/// May be slow (seconds) and may fail transiently; the retry controller owns
/// timeout and retry semantics, so implementations should make one honest
/// attempt per call.
pub trait AgentInvoker: Send + Sync {
    /// Execute one invocation attempt and return the raw response payload.
    fn invoke(
        &self,
        request: &InvokeRequest,
    ) -> impl std::future::Future<Output = Result<Value, InvokeError>> + Send;
}
