//! Workflow YAML parser.

use std::collections::HashSet;
use std::path::Path;

use super::types::Workflow;
use crate::error::{Error, Result};

/// Parse a workflow from a YAML string and validate its structure.
pub fn parse_workflow(yaml: &str) -> Result<Workflow> {
    if yaml.trim().is_empty() {
        return Err(Error::Parse("Empty workflow definition".to_string()));
    }

    let workflow: Workflow = serde_yaml::from_str(yaml).map_err(|e| {
        let msg = e.to_string();
        if let Some(field) = extract_missing_field(&msg) {
            Error::Parse(format!("Missing required field: {}", field))
        } else {
            Error::Parse(format!("Invalid YAML: {}", msg))
        }
    })?;

    validate_workflow(&workflow)?;
    Ok(workflow)
}

/// Parse a workflow from a file path.
pub fn parse_workflow_file(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow(&content)
}

/// Structural validation: non-empty, unique ids, known edge endpoints.
///
/// Cycle detection is left to the sorter so the executor reports it in run
/// terms; this pass only rejects definitions the sorter cannot even index.
fn validate_workflow(workflow: &Workflow) -> Result<()> {
    if workflow.nodes.is_empty() {
        return Err(Error::Validation(format!(
            "Workflow '{}' has no nodes",
            workflow.name
        )));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for node in &workflow.nodes {
        if node.id.is_empty() {
            return Err(Error::Validation(format!(
                "Workflow '{}' contains a node with an empty id",
                workflow.name
            )));
        }
        if !seen.insert(node.id.as_str()) {
            return Err(Error::Validation(format!("Duplicate node id '{}'", node.id)));
        }
        if node.app.is_empty() {
            return Err(Error::Validation(format!(
                "Node '{}' is missing an app tag",
                node.id
            )));
        }
    }

    for edge in &workflow.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !seen.contains(endpoint.as_str()) {
                return Err(Error::Validation(format!(
                    "Edge references unknown node '{}'",
                    endpoint
                )));
            }
        }
    }

    Ok(())
}

fn extract_missing_field(error_message: &str) -> Option<&str> {
    let marker = "missing field `";
    let start = error_message.find(marker)? + marker.len();
    let rest = &error_message[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::BackoffType;

    #[test]
    fn test_parse_simple_workflow() {
        let yaml = r##"
id: wf-orders
name: order-notification
description: Notify on new orders

nodes:
  - id: fetch-orders
    title: Fetch orders
    app: sheets
    params:
      range: "Orders!A1:F100"

  - id: notify
    title: Post to channel
    app: slack
    params:
      channel: "#orders"
    retry:
      max_attempts: 2
      base_delay_ms: 500
      backoff: exponential

edges:
  - source: fetch-orders
    target: notify
"##;

        let workflow = parse_workflow(yaml).unwrap();
        assert_eq!(workflow.id, "wf-orders");
        assert_eq!(workflow.nodes.len(), 2);
        assert_eq!(workflow.edges.len(), 1);

        let notify = workflow.get_node("notify").unwrap();
        let retry = notify.retry.as_ref().unwrap();
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.backoff, BackoffType::Exponential);
        assert_eq!(
            notify.params.get("channel").and_then(|v| v.as_str()),
            Some("#orders")
        );
    }

    #[test]
    fn test_parse_missing_field() {
        let yaml = r#"
id: wf-x
name: broken
nodes:
  - id: only
    app: slack
"#;
        let err = parse_workflow(yaml).unwrap_err();
        assert!(err.to_string().contains("title"), "{}", err);
    }

    #[test]
    fn test_parse_empty_definition() {
        assert!(matches!(parse_workflow("   "), Err(Error::Parse(_))));
    }

    #[test]
    fn test_validate_duplicate_node_id() {
        let yaml = r#"
id: wf-dup
name: dup
nodes:
  - id: a
    title: A
    app: demo
  - id: a
    title: Again
    app: demo
"#;
        assert!(matches!(parse_workflow(yaml), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_unknown_edge_endpoint() {
        let yaml = r#"
id: wf-edge
name: bad-edge
nodes:
  - id: a
    title: A
    app: demo
edges:
  - source: a
    target: ghost
"#;
        let err = parse_workflow(yaml).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
