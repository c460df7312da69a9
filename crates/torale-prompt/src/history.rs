//! Execution History Store (spec.md §4.4): fetches and renders the most
//! recent N successful executions of a task for inclusion in the next
//! agent prompt. Row parsing itself (JSONB coercion) lives in
//! `torale_repositories::executions` per
//! `fc-outbox::postgres::parse_row`'s defensive-coercion pattern; this
//! module only formats already-parsed rows.

use torale_common::truncate_evidence;
use torale_repositories::TaskExecution;

const EVIDENCE_TRUNCATION_CHARS: usize = 300;

/// Render one history record as it appears inside `<execution-history>`.
pub fn render_record(execution: &TaskExecution) -> String {
    let evidence = execution
        .result
        .get("evidence")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let confidence = execution.result.get("confidence").and_then(|v| v.as_i64());
    let sources: Vec<String> = execution
        .grounding_sources
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| {
                    let url = v.get("url")?.as_str()?;
                    match v.get("title").and_then(|t| t.as_str()) {
                        Some(title) if !title.is_empty() => Some(format!("{title} ({url})")),
                        _ => Some(url.to_string()),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let mut block = String::new();
    block.push_str(&format!("completed_at: {}\n", execution.completed_at.map(|t| t.to_rfc3339()).unwrap_or_default()));
    match confidence {
        Some(c) => block.push_str(&format!("confidence: {c}\n")),
        None => block.push_str("confidence: unknown\n"),
    }
    block.push_str(&format!(
        "evidence: {}\n",
        truncate_evidence(evidence, EVIDENCE_TRUNCATION_CHARS)
    ));
    if sources.is_empty() {
        block.push_str("sources: (none)\n");
    } else {
        block.push_str(&format!("sources: {}\n", sources.join(", ")));
    }
    if let Some(notification) = execution.notification.as_deref() {
        block.push_str(&format!("notification_sent: {notification}\n"));
    }
    block
}

/// Render a full set of history records, oldest-to-newest, as they should
/// appear inside `<execution-history>`. `executions` must already be in
/// oldest-to-newest order (as returned by
/// `TaskExecutionRepository::recent_history`).
pub fn render_history_block(executions: &[TaskExecution]) -> String {
    if executions.is_empty() {
        return String::new();
    }
    executions
        .iter()
        .enumerate()
        .map(|(i, e)| format!("[{}]\n{}", i + 1, render_record(e)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn sample_execution(evidence: &str, confidence: Option<i64>) -> TaskExecution {
        let mut result = serde_json::Map::new();
        result.insert("evidence".into(), json!(evidence));
        if let Some(c) = confidence {
            result.insert("confidence".into(), json!(c));
        }
        TaskExecution {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            status: torale_repositories::ExecutionStatus::Success,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            retry_count: 0,
            error_category: None,
            internal_error: None,
            notification: Some("Price dropped below threshold".to_string()),
            result: serde_json::Value::Object(result),
            grounding_sources: json!([
                {"url": "https://example.com/a", "title": ""},
                {"url": "https://example.com/b", "title": ""}
            ]),
        }
    }

    #[test]
    fn render_record_includes_all_fields() {
        let execution = sample_execution("prices checked, no change", Some(80));
        let rendered = render_record(&execution);
        assert!(rendered.contains("confidence: 80"));
        assert!(rendered.contains("evidence: prices checked, no change"));
        assert!(rendered.contains("sources: https://example.com/a, https://example.com/b"));
        assert!(rendered.contains("notification_sent: Price dropped below threshold"));
    }

    #[test]
    fn render_record_truncates_long_evidence() {
        let long_evidence = "x".repeat(500);
        let execution = sample_execution(&long_evidence, Some(50));
        let rendered = render_record(&execution);
        assert!(rendered.contains('…'));
        assert!(!rendered.contains(&"x".repeat(400)));
    }

    #[test]
    fn render_history_block_is_empty_for_no_executions() {
        assert_eq!(render_history_block(&[]), "");
    }

    #[test]
    fn render_history_block_numbers_entries_in_order() {
        let executions = vec![sample_execution("first", Some(10)), sample_execution("second", Some(20))];
        let block = render_history_block(&executions);
        let first_idx = block.find("[1]").unwrap();
        let second_idx = block.find("[2]").unwrap();
        assert!(first_idx < second_idx);
    }
}
