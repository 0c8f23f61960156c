//! 感知层：观察当前目标，产出规范化快照与可交互元素列表
//!
//! 快照是纯文本，每个可交互元素一行：`[<selector>] <role>: "<name>"`。
//! 快照里不能出现时间戳等易变内容，否则指纹失去意义（这是感知实现的契约）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::fingerprint::{fingerprint, Fingerprint};

/// 单次观察结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub locator: String,
    pub snapshot: String,
    /// 本次发现的动作标识（元素引用）
    pub affordances: Vec<String>,
}

impl Observation {
    /// 指纹由核心根据快照计算，不信任外部给出的值
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(&self.snapshot)
    }
}

/// 感知源：无中间动作且目标未变化时，连续两次 observe 必须返回相同结果
#[async_trait]
pub trait PerceptionSource: Send + Sync {
    /// locator 为 Some 时先导航到该地址再观察；None 表示观察当前页面
    async fn observe(&self, locator: Option<&str>) -> Result<Observation, String>;

    async fn release(&self) {}
}

/// 快照中的一个可交互元素
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotElement {
    pub selector: String,
    pub role: String,
    pub name: String,
}

impl SnapshotElement {
    pub fn to_line(&self) -> String {
        if self.name.is_empty() {
            format!("[{}] {}", self.selector, self.role)
        } else {
            format!("[{}] {}: \"{}\"", self.selector, self.role, self.name)
        }
    }
}

/// 渲染规范化快照：标题、地址、元素行；超过 max_chars 时截断
pub fn render_snapshot(title: &str, locator: &str, elements: &[SnapshotElement], max_chars: usize) -> String {
    let mut lines = vec![format!("# {}", title), format!("URL: {}", locator), String::new()];
    lines.extend(elements.iter().map(SnapshotElement::to_line));
    let output = lines.join("\n");
    if output.chars().count() > max_chars {
        output.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        output
    }
}

/// 从快照行解析元素（能力探测器使用）
pub fn parse_snapshot_line(line: &str) -> Option<SnapshotElement> {
    let rest = line.trim().strip_prefix('[')?;
    let close = rest.rfind("] ")?;
    let selector = &rest[..close];
    let tail = &rest[close + 2..];
    let (role, name) = match tail.split_once(": ") {
        Some((role, name)) => (role, name.trim_matches('"')),
        None => (tail, ""),
    };
    Some(SnapshotElement {
        selector: selector.to_string(),
        role: role.trim().to_string(),
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(selector: &str, role: &str, name: &str) -> SnapshotElement {
        SnapshotElement {
            selector: selector.into(),
            role: role.into(),
            name: name.into(),
        }
    }

    #[test]
    fn test_render_snapshot() {
        let snapshot = render_snapshot(
            "Home",
            "https://app.test/",
            &[el("#login", "button", "Sign in"), el("nav > a:nth-of-type(2)", "link", "")],
            8000,
        );
        assert_eq!(
            snapshot,
            "# Home\nURL: https://app.test/\n\n[#login] button: \"Sign in\"\n[nav > a:nth-of-type(2)] link"
        );
    }

    #[test]
    fn test_render_snapshot_truncates() {
        let elements: Vec<_> = (0..50).map(|i| el(&format!("#b{i}"), "button", "x")).collect();
        let snapshot = render_snapshot("T", "u", &elements, 40);
        assert!(snapshot.ends_with("...[truncated]"));
    }

    #[test]
    fn test_parse_snapshot_line_roundtrip() {
        let element = el("input[name=\"user\"]", "textbox", "Username");
        assert_eq!(parse_snapshot_line(&element.to_line()), Some(element));

        let unnamed = el("#x", "button", "");
        assert_eq!(parse_snapshot_line(&unnamed.to_line()), Some(unnamed));

        assert_eq!(parse_snapshot_line("URL: https://app.test/"), None);
    }

    #[test]
    fn test_observation_fingerprint_ignores_locator() {
        let a = Observation {
            locator: "/a".into(),
            snapshot: "same".into(),
            affordances: vec![],
        };
        let b = Observation {
            locator: "/b".into(),
            ..a.clone()
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
