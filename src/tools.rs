//! Runtime tool path resolution
//!
//! Every external tool berth shells out to can be overridden with an
//! environment variable `{TOOL}_BIN` (e.g. `KUBECTL_BIN`, `DOCKER_BIN`).
//! Without the override the value from `berth.yaml` is used, which for
//! microk8s hosts is typically a multi-word command such as `microk8s kubectl`.

use std::env;
use tracing::warn;

/// Common tool names
pub mod tools {
    pub const KUBECTL: &str = "kubectl";
    pub const DOCKER: &str = "docker";
}

/// Resolve the command prefix for a tool
///
/// Checks `{TOOL}_BIN` (uppercase tool name + "_BIN") and falls back to the
/// configured command.
pub fn resolve_tool(tool: &str, configured: &str) -> String {
    let env_var = format!("{}_BIN", tool.to_uppercase());
    env::var(&env_var).unwrap_or_else(|_| configured.to_string())
}

/// Warn early when the first word of a command prefix is not on PATH.
///
/// The run continues either way; the executor reports the real failure.
pub fn check_available(command: &str) -> bool {
    let Some(program) = command.split_whitespace().next() else {
        return false;
    };

    match which::which(program) {
        Ok(_) => true,
        Err(_) => {
            warn!("⚠️  `{}` not found in PATH (from `{}`)", program, command);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_resolve_tool_from_env() {
        env::set_var("BERTH_TEST_TOOL_BIN", "/custom/path/to/tool");
        assert_eq!(
            resolve_tool("berth_test_tool", "fallback"),
            "/custom/path/to/tool"
        );
        env::remove_var("BERTH_TEST_TOOL_BIN");
    }

    #[test]
    fn test_resolve_tool_fallback() {
        env::remove_var("MISSING_TOOL_BIN");
        assert_eq!(
            resolve_tool("missing_tool", "microk8s kubectl"),
            "microk8s kubectl"
        );
    }

    #[test]
    fn test_check_available_empty_command() {
        assert!(!check_available("   "));
    }
}
