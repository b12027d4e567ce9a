//! Simulated connectivity for the tab.

use super::json_output;
use crate::shell::Shell;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NetworkSetParams {
    /// False cuts the tab off from the origin.
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NetworkOutput {
    pub online: bool,
    /// Whether this call changed the state.
    pub changed: bool,
    pub pending: usize,
}

/// Going back online fires the connectivity-restored signal; the queue
/// listener drains in the background.
pub async fn set_impl(shell: &Shell, params: NetworkSetParams) -> Result<CallToolResult, McpError> {
    let changed = shell.gate.set_online(params.online);
    let pending = shell.queue.pending().await?;
    json_output(&NetworkOutput { online: shell.gate.is_online(), changed, pending })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::fake;
    use crate::tools::output_json;

    #[tokio::test]
    async fn test_toggle_reports_change() {
        let (shell, _) = fake::shell().await;

        let output = output_json(&set_impl(&shell, NetworkSetParams { online: false }).await.unwrap());
        assert_eq!(output["online"], false);
        assert_eq!(output["changed"], true);

        let output = output_json(&set_impl(&shell, NetworkSetParams { online: false }).await.unwrap());
        assert_eq!(output["changed"], false);

        let output = output_json(&set_impl(&shell, NetworkSetParams { online: true }).await.unwrap());
        assert_eq!(output["online"], true);
        assert_eq!(output["changed"], true);
    }
}
