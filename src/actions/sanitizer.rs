//! 选择器清洗：动作派发前规范化元素引用
//!
//! 决策后端（尤其是 LLM）给出的引用常带有快照格式残留，如 `[#submit]`、多余引号或空白。

/// 可插拔的选择器清洗能力
pub trait SelectorSanitizer: Send + Sync {
    fn sanitize(&self, target: &str) -> String;
}

/// 默认实现：去掉快照中的方括号包裹、首尾引号与反引号、折叠空白
#[derive(Debug, Default, Clone)]
pub struct CssSelectorSanitizer;

impl SelectorSanitizer for CssSelectorSanitizer {
    fn sanitize(&self, target: &str) -> String {
        let mut s = target.trim();
        if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            // 属性选择器本身也以 [ 开头，只剥离不含 = 的快照引用
            if !inner.contains('=') {
                s = inner.trim();
            }
        }
        let s = s.trim_matches(|c| c == '`' || c == '"' || c == '\'');
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_snapshot_brackets() {
        let s = CssSelectorSanitizer;
        assert_eq!(s.sanitize("[#submit]"), "#submit");
        assert_eq!(s.sanitize("  `#nav > a`  "), "#nav > a");
        assert_eq!(s.sanitize("\"form  button\""), "form button");
    }

    #[test]
    fn test_attribute_selector_untouched() {
        let s = CssSelectorSanitizer;
        assert_eq!(s.sanitize("[name=\"q\"]"), "[name=\"q\"]");
        assert_eq!(s.sanitize("input[name=\"q\"]"), "input[name=\"q\"]");
    }
}
