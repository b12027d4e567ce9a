//! Cache agent inspection and reset.

use super::json_output;
use crate::shell::Shell;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shell_client::{AgentStatus, IgnoredFailure};

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusOutput {
    #[serde(flatten)]
    pub status: AgentStatus,
    pub failures: Vec<IgnoredFailure>,
}

pub async fn status_impl(shell: &Shell) -> Result<CallToolResult, McpError> {
    shell.agent.settle().await;
    let status = shell.agent.status().await?;
    json_output(&AgentStatusOutput { status, failures: shell.agent.ignored_failures() })
}

fn default_reinstall() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentClearParams {
    /// Install and activate again after clearing (default: true).
    #[serde(default = "default_reinstall")]
    pub reinstall: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentClearOutput {
    pub removed: Vec<String>,
    pub reinstalled: bool,
    pub install_error: Option<String>,
}

/// Drop the current version's tiers, optionally reinstalling from the origin.
pub async fn clear_impl(shell: &Shell, params: AgentClearParams) -> Result<CallToolResult, McpError> {
    let removed = shell.agent.clear().await?;

    let mut output = AgentClearOutput { removed, reinstalled: false, install_error: None };
    if params.reinstall {
        let result = match shell.agent.install().await {
            Ok(()) => shell.agent.activate().await.map(|_| ()),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => output.reinstalled = true,
            Err(err) => output.install_error = Some(err.to_string()),
        }
    }
    json_output(&output)
}
