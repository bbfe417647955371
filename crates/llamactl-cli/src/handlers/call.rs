//! Call command handler.

use anyhow::{Context, Result};
use llamactl_control::Operation;
use llamactl_core::LlamactlConfig;
use serde_json::Value;

use crate::bootstrap::connect_client;

/// Decode the event and payload into an operation before connecting.
pub fn parse_operation(event: &str, payload: Option<&str>) -> Result<Operation> {
    let payload = payload
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--payload is not valid JSON")?;
    Ok(Operation::parse(event, payload)?)
}

/// Execute the call command: one request, reply printed as JSON.
pub async fn execute(
    config: &LlamactlConfig,
    event: &str,
    payload: Option<&str>,
    connect: Option<String>,
) -> Result<()> {
    let op = parse_operation(event, payload)?;
    let client = connect_client(config, connect);
    let reply = client.request(op).await;
    client.shutdown().await;

    let value = reply.with_context(|| format!("{event} failed"))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operation() {
        let op = parse_operation("models:unload", Some(r#"{"modelId":"qwen"}"#)).unwrap();
        assert_eq!(op, Operation::unload("qwen"));
    }

    #[test]
    fn test_bad_json_payload() {
        let err = parse_operation("models:load", Some("{modelId")).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_unknown_event() {
        let err = parse_operation("gpu:melt", None).unwrap_err();
        assert_eq!(err.to_string(), "Unknown event: gpu:melt");
    }
}
