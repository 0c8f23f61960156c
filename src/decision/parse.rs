//! 决策输出解析与规范化
//!
//! 从文本中提取 JSON（```json ... ```、对象 `{...}` 或动作数组 `[{...}]`），再识别形态：
//! - 动作对象 `{"kind": ...}` 或 `{"action": {...}}` → Single
//! - 数组 `[...]` 或 `{"actions": [...]}` → Batch
//! - `{"done": true}` / `{"terminal": ...}` → Terminal

use serde_json::Value;
use thiserror::Error;

use crate::actions::{Action, ActionKind};
use crate::decision::{DecisionResult, ProviderReply};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecisionParseError {
    #[error("no decision found in output")]
    NoDecision,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("unrecognized decision shape")]
    UnknownShape,
    #[error("empty action batch")]
    EmptyBatch,
    #[error("navigate is only allowed at session start")]
    NavigateDisallowed,
}

/// 规范化后端回复；at_session_start 为 false 时拒绝 navigate
pub fn normalize(reply: ProviderReply, at_session_start: bool) -> Result<DecisionResult, DecisionParseError> {
    let decision = match reply {
        ProviderReply::Text(text) => parse_decision(&text)?,
        ProviderReply::Decision(decision) => decision,
    };

    let actions: &[Action] = match &decision {
        DecisionResult::Single(action) => std::slice::from_ref(action),
        DecisionResult::Batch(actions) => actions,
        DecisionResult::Terminal { .. } => &[],
    };
    if matches!(decision, DecisionResult::Batch(ref a) if a.is_empty()) {
        return Err(DecisionParseError::EmptyBatch);
    }
    if !at_session_start && actions.iter().any(|a| a.kind == ActionKind::Navigate) {
        return Err(DecisionParseError::NavigateDisallowed);
    }
    Ok(decision)
}

pub fn parse_decision(output: &str) -> Result<DecisionResult, DecisionParseError> {
    let mut last_error = None;
    for candidate in json_candidates(output) {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => return decision_from_value(value),
            Err(e) => last_error = Some(DecisionParseError::InvalidJson(format!("{}: {}", e, candidate))),
        }
    }
    Err(last_error.unwrap_or(DecisionParseError::NoDecision))
}

/// 候选 JSON 片段，按优先级排列：代码块；然后对象 `{...}` 与动作数组 `[{...}]` 按出现位置排序。
/// 快照引用 `[#selector]` 不会被当作数组。
fn json_candidates(output: &str) -> Vec<&str> {
    let trimmed = output.trim();
    let mut candidates = Vec::new();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        candidates.push(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }

    let object = trimmed
        .find('{')
        .and_then(|start| span(trimmed, start, '}'));
    let array = trimmed
        .match_indices('[')
        .map(|(i, _)| i)
        .find(|&i| trimmed[i + 1..].trim_start().starts_with('{'))
        .and_then(|start| span(trimmed, start, ']'));

    match (object, array) {
        (Some(o), Some(a)) if a.0 < o.0 => candidates.extend([a.1, o.1]),
        (o, a) => candidates.extend(o.into_iter().chain(a).map(|(_, s)| s)),
    }
    candidates
}

/// 从 start 到最后一个 close 的片段
fn span(text: &str, start: usize, close: char) -> Option<(usize, &str)> {
    let end = text.rfind(close)?;
    (end > start).then(|| (start, &text[start..=end]))
}

fn decision_from_value(value: Value) -> Result<DecisionResult, DecisionParseError> {
    match value {
        Value::Array(items) => batch_from(items),
        Value::Object(mut map) => {
            if let Some(done) = map.get("done") {
                if done.as_bool() == Some(true) {
                    return Ok(DecisionResult::terminal(reason_of(&map, "provider reported done")));
                }
            }
            if let Some(terminal) = map.get("terminal") {
                if !matches!(terminal, Value::Bool(false) | Value::Null) {
                    let fallback = terminal.as_str().unwrap_or("provider signalled terminal").to_string();
                    return Ok(DecisionResult::terminal(reason_of(&map, &fallback)));
                }
            }
            if let Some(actions) = map.remove("actions") {
                return match actions {
                    Value::Array(items) => batch_from(items),
                    _ => Err(DecisionParseError::UnknownShape),
                };
            }
            if let Some(action) = map.remove("action") {
                return action_from(action).map(DecisionResult::Single);
            }
            if map.contains_key("kind") {
                return action_from(Value::Object(map)).map(DecisionResult::Single);
            }
            Err(DecisionParseError::UnknownShape)
        }
        _ => Err(DecisionParseError::UnknownShape),
    }
}

fn batch_from(items: Vec<Value>) -> Result<DecisionResult, DecisionParseError> {
    items
        .into_iter()
        .map(action_from)
        .collect::<Result<Vec<_>, _>>()
        .map(DecisionResult::Batch)
}

fn action_from(value: Value) -> Result<Action, DecisionParseError> {
    serde_json::from_value(value).map_err(|e| DecisionParseError::InvalidAction(e.to_string()))
}

fn reason_of(map: &serde_json::Map<String, Value>, fallback: &str) -> String {
    map.get("reason")
        .and_then(|r| r.as_str())
        .unwrap_or(fallback)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_action_object() {
        let out = r##"I will click it. {"kind": "activate", "target": "#login"}"##;
        assert_eq!(
            parse_decision(out).unwrap(),
            DecisionResult::Single(Action::activate("#login"))
        );
    }

    #[test]
    fn test_parse_wrapped_action() {
        let out = r##"{"action": {"kind": "enter_text", "target": "#q", "text": "rust"}}"##;
        assert_eq!(
            parse_decision(out).unwrap(),
            DecisionResult::Single(Action::enter_text("#q", "rust"))
        );
    }

    #[test]
    fn test_parse_batch_in_code_fence() {
        let out = "Plan:\n```json\n{\"actions\": [{\"kind\": \"enter_text\", \"target\": \"#q\", \"text\": \"a\"}, {\"kind\": \"activate\", \"target\": \"#go\"}]}\n```";
        match parse_decision(out).unwrap() {
            DecisionResult::Batch(actions) => {
                assert_eq!(actions.len(), 2);
                assert_eq!(actions[1], Action::activate("#go"));
            }
            other => panic!("Expected Batch, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bare_array() {
        let out = r##"[{"kind": "activate", "target": "#a"}]"##;
        assert!(matches!(parse_decision(out).unwrap(), DecisionResult::Batch(a) if a.len() == 1));
    }

    #[test]
    fn test_parse_ignores_bracketed_selectors_in_prose() {
        let out = r##"I will click [#login] now: {"kind":"activate","target":"#login"}"##;
        assert_eq!(
            parse_decision(out).unwrap(),
            DecisionResult::Single(Action::activate("#login"))
        );

        let batch = r##"Fill [#q] then press [#go]: [{"kind":"enter_text","target":"#q","text":"a"},{"kind":"activate","target":"#go"}]"##;
        assert!(matches!(parse_decision(batch).unwrap(), DecisionResult::Batch(a) if a.len() == 2));
    }

    #[test]
    fn test_parse_terminal() {
        let done = parse_decision(r#"{"done": true, "reason": "all flows covered"}"#).unwrap();
        assert_eq!(done, DecisionResult::terminal("all flows covered"));

        let terminal = parse_decision(r#"{"terminal": "nothing left"}"#).unwrap();
        assert_eq!(terminal, DecisionResult::terminal("nothing left"));
    }

    #[test]
    fn test_parse_failures() {
        assert_eq!(
            parse_decision("I think we are finished here."),
            Err(DecisionParseError::NoDecision)
        );
        assert!(matches!(
            parse_decision("{not json}"),
            Err(DecisionParseError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_decision(r##"{"kind": "hover", "target": "#a"}"##),
            Err(DecisionParseError::InvalidAction(_))
        ));
        assert_eq!(
            parse_decision(r#"{"thought": "hmm"}"#),
            Err(DecisionParseError::UnknownShape)
        );
    }

    #[test]
    fn test_normalize_rejects_empty_batch() {
        let reply = ProviderReply::Text(r#"{"actions": []}"#.to_string());
        assert_eq!(normalize(reply, false), Err(DecisionParseError::EmptyBatch));
    }

    #[test]
    fn test_normalize_navigate_policy() {
        let reply = ProviderReply::Decision(DecisionResult::Single(Action::navigate("https://x.test")));
        assert_eq!(
            normalize(reply.clone(), false),
            Err(DecisionParseError::NavigateDisallowed)
        );
        assert!(normalize(reply, true).is_ok());
    }

    #[test]
    fn test_normalize_passes_structured_decision() {
        let reply = ProviderReply::Decision(DecisionResult::terminal("stop"));
        assert_eq!(normalize(reply, false), Ok(DecisionResult::terminal("stop")));
    }
}
