//! 浏览器驱动：使用 Headless Chrome 同时充当感知源与动作目标
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! 快照由页面内脚本枚举可交互元素生成，每个元素给出稳定的 CSS 选择器作为动作标识；
//! 不包含输入框内容、时间等易变信息，保证同一页面多次观察结果一致。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;

use crate::actions::{Action, ActionKind, ActionTarget};
use crate::config::BrowserSection;
use crate::perception::{render_snapshot, Observation, PerceptionSource, SnapshotElement};

/// 页面内枚举脚本：返回 `{"title": ..., "elements": [{selector, role, name}]}` 的 JSON 字符串
const ENUMERATE_JS: &str = r#"
(function() {
    const implicitRole = (el) => {
        const tag = el.tagName.toLowerCase();
        if (tag === 'a') return 'link';
        if (tag === 'button') return 'button';
        if (tag === 'select') return 'combobox';
        if (tag === 'textarea') return 'textbox';
        if (tag === 'dialog') return 'dialog';
        if (tag === 'input') {
            const t = (el.getAttribute('type') || 'text').toLowerCase();
            if (['button', 'submit', 'reset', 'image'].includes(t)) return 'button';
            if (t === 'checkbox' || t === 'radio') return t;
            if (t === 'search') return 'searchbox';
            return 'textbox';
        }
        return tag;
    };
    const selectorOf = (el) => {
        if (el.id) return '#' + CSS.escape(el.id);
        const name = el.getAttribute('name');
        if (name) {
            const sel = el.tagName.toLowerCase() + '[name="' + name.replace(/"/g, '\\"') + '"]';
            if (document.querySelectorAll(sel).length === 1) return sel;
        }
        const parts = [];
        let node = el;
        while (node && node.nodeType === 1 && node !== document.body) {
            let part = node.tagName.toLowerCase();
            const parent = node.parentElement;
            if (parent) {
                const same = Array.from(parent.children).filter(c => c.tagName === node.tagName);
                if (same.length > 1) part += ':nth-of-type(' + (same.indexOf(node) + 1) + ')';
            }
            parts.unshift(part);
            node = parent;
        }
        return 'body > ' + parts.join(' > ');
    };
    const nameOf = (el) => {
        const label = el.getAttribute('aria-label')
            || (el.labels && el.labels.length ? el.labels[0].innerText : '')
            || el.getAttribute('placeholder')
            || el.getAttribute('title')
            || (el.tagName === 'INPUT' ? '' : el.innerText)
            || '';
        return label.replace(/\s+/g, ' ').trim().substring(0, 80);
    };
    const visible = (el) => el.getClientRects().length > 0;
    const query = 'a[href], button, input:not([type="hidden"]), select, textarea, [role], dialog[open]';
    const elements = [];
    const seen = new Set();
    for (const el of document.querySelectorAll(query)) {
        if (!visible(el) || el.disabled) continue;
        const role = (el.getAttribute('role') || implicitRole(el)).toLowerCase();
        if (['none', 'presentation', 'generic'].includes(role)) continue;
        const selector = selectorOf(el);
        if (seen.has(selector)) continue;
        seen.add(selector);
        elements.push({ selector, role, name: nameOf(el) });
    }
    return JSON.stringify({ title: document.title, elements });
})()
"#;

/// 只出现在快照中、不作为可执行动作的角色
const NON_ACTIONABLE_ROLES: &[&str] = &["dialog", "alertdialog"];

#[derive(Debug, Deserialize)]
struct PageScan {
    title: String,
    elements: Vec<SnapshotElement>,
}

/// 从 URL 提取域名（小写）
fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let url = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = url.split('/').next()?;
    let host = host.split(':').next()?;
    Some(host.to_lowercase())
}

/// 把 Rust 字符串安全地嵌入 JS（JSON 字符串字面量即合法的 JS 字符串）
fn js_string(value: &str) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| e.to_string())
}

fn action_script(action: &Action) -> Result<String, String> {
    let target = action
        .target
        .as_deref()
        .ok_or_else(|| "missing target".to_string())?;
    let selector = js_string(target)?;
    let body = match action.kind {
        ActionKind::Activate => "el.scrollIntoView({ block: 'center' }); el.click();".to_string(),
        ActionKind::EnterText => {
            let text = js_string(action.text.as_deref().unwrap_or(""))?;
            format!(
                "el.focus(); \
                 if ('value' in el) {{ el.value = {text}; }} else {{ el.textContent = {text}; }} \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }}));"
            )
        }
        ActionKind::ChooseOption => {
            let value = js_string(action.value.as_deref().unwrap_or(""))?;
            format!(
                "const opt = Array.from(el.options || []).find(o => o.value === {value} || o.text.trim() === {value}); \
                 if (!opt) return 'option not found'; \
                 el.value = opt.value; \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }}));"
            )
        }
        ActionKind::Navigate => return Err("navigate is not a DOM action".to_string()),
    };
    Ok(format!(
        "(function() {{ const el = document.querySelector({selector}); \
         if (!el) return 'element not found'; {body} return 'ok'; }})()"
    ))
}

/// 浏览器驱动：每个会话一个实例（独立的 Chrome 进程与标签页）
pub struct BrowserDriver {
    allowed_domains: HashSet<String>,
    max_snapshot_chars: usize,
    settle: Duration,
    headless: bool,
    browser: Arc<Mutex<Option<Browser>>>,
    tab: Arc<Mutex<Option<Arc<Tab>>>>,
}

impl BrowserDriver {
    pub fn new(cfg: &BrowserSection) -> Self {
        Self {
            allowed_domains: cfg
                .allowed_domains
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
            max_snapshot_chars: cfg.max_snapshot_chars,
            settle: Duration::from_millis(cfg.settle_ms),
            headless: cfg.headless,
            browser: Arc::new(Mutex::new(None)),
            tab: Arc::new(Mutex::new(None)),
        }
    }

    /// 白名单为空时不限制
    fn is_allowed(&self, url: &str) -> Result<(), String> {
        if self.allowed_domains.is_empty() {
            return Ok(());
        }
        let domain = extract_domain(url).ok_or_else(|| "Invalid or missing URL".to_string())?;
        if self.allowed_domains.contains(&domain) {
            return Ok(());
        }
        Err(format!("Domain not in allowlist: {}", domain))
    }

    /// 取当前标签页；首次调用时启动浏览器
    fn tab(&self) -> Result<Arc<Tab>, String> {
        let mut tab_guard = self.tab.lock().map_err(|e| e.to_string())?;
        if let Some(tab) = tab_guard.as_ref() {
            return Ok(Arc::clone(tab));
        }
        let mut browser_guard = self.browser.lock().map_err(|e| e.to_string())?;
        if browser_guard.is_none() {
            let options = LaunchOptions::default_builder()
                .headless(self.headless)
                .build()
                .map_err(|e| format!("Chrome launch options: {}", e))?;
            let browser =
                Browser::new(options).map_err(|e| format!("Chrome launch failed: {}", e))?;
            *browser_guard = Some(browser);
        }
        let browser = browser_guard
            .as_ref()
            .ok_or_else(|| "browser released".to_string())?;
        let tab = browser
            .new_tab()
            .map_err(|e| format!("Browser tab failed: {}", e))?;
        *tab_guard = Some(Arc::clone(&tab));
        Ok(tab)
    }

    fn scan(tab: &Tab, max_chars: usize) -> Result<Observation, String> {
        let result = tab
            .evaluate(ENUMERATE_JS, false)
            .map_err(|e| format!("Page scan failed: {}", e))?;
        let raw = result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| "Page scan returned no data".to_string())?;
        let scan: PageScan =
            serde_json::from_str(raw).map_err(|e| format!("Page scan parse failed: {}", e))?;

        let locator = tab.get_url();
        let snapshot = render_snapshot(&scan.title, &locator, &scan.elements, max_chars);
        let affordances = scan
            .elements
            .into_iter()
            .filter(|el| !NON_ACTIONABLE_ROLES.contains(&el.role.as_str()))
            .map(|el| el.selector)
            .collect();
        Ok(Observation {
            locator,
            snapshot,
            affordances,
        })
    }
}

#[async_trait]
impl PerceptionSource for BrowserDriver {
    async fn observe(&self, locator: Option<&str>) -> Result<Observation, String> {
        if let Some(url) = locator {
            self.is_allowed(url)?;
        }
        let tab = self.tab()?;
        let url = locator.map(String::from);
        let settle = self.settle;
        let max_chars = self.max_snapshot_chars;

        tokio::task::spawn_blocking(move || {
            if let Some(url) = url {
                tracing::info!(url = %url, "browser navigate");
                tab.navigate_to(&url)
                    .and_then(|t| t.wait_until_navigated())
                    .map_err(|e| format!("Navigate failed: {}", e))?;
                tab.wait_for_element("body")
                    .map_err(|e| format!("Page did not load: {}", e))?;
            }
            std::thread::sleep(settle);
            Self::scan(&tab, max_chars)
        })
        .await
        .map_err(|e| format!("Task join: {}", e))?
    }

    async fn release(&self) {
        self.release_handles();
    }
}

#[async_trait]
impl ActionTarget for BrowserDriver {
    async fn apply(&self, action: &Action) -> Result<(), String> {
        let tab = self.tab()?;
        let settle = self.settle;

        if action.kind == ActionKind::Navigate {
            let url = action
                .target
                .clone()
                .ok_or_else(|| "missing target".to_string())?;
            self.is_allowed(&url)?;
            return tokio::task::spawn_blocking(move || {
                tab.navigate_to(&url)
                    .and_then(|t| t.wait_until_navigated())
                    .map(|_| ())
                    .map_err(|e| format!("Navigate failed: {}", e))
            })
            .await
            .map_err(|e| format!("Task join: {}", e))?;
        }

        let script = action_script(action)?;
        tokio::task::spawn_blocking(move || {
            let result = tab
                .evaluate(&script, false)
                .map_err(|e| format!("Script failed: {}", e))?;
            match result.value.as_ref().and_then(|v| v.as_str()) {
                Some("ok") => {
                    std::thread::sleep(settle);
                    Ok(())
                }
                Some(other) => Err(other.to_string()),
                None => Err("Script returned no result".to_string()),
            }
        })
        .await
        .map_err(|e| format!("Task join: {}", e))?
    }

    async fn release(&self) {
        self.release_handles();
    }
}

impl BrowserDriver {
    /// 关闭标签页并结束浏览器进程；可重复调用
    fn release_handles(&self) {
        let tab = self.tab.lock().ok().and_then(|mut t| t.take());
        if let Some(tab) = tab {
            if let Err(e) = tab.close(false) {
                tracing::debug!(error = %e, "tab close failed");
            }
        }
        let browser = self.browser.lock().ok().and_then(|mut b| b.take());
        drop(browser);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(domains: &[&str]) -> BrowserDriver {
        let cfg = BrowserSection {
            allowed_domains: domains.iter().map(|d| d.to_string()).collect(),
            ..BrowserSection::default()
        };
        BrowserDriver::new(&cfg)
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://App.Test:8080/login"),
            Some("app.test".to_string())
        );
        assert_eq!(extract_domain("ftp://x"), None);
    }

    #[test]
    fn test_allowlist() {
        assert!(driver(&[]).is_allowed("https://anything.test").is_ok());
        let d = driver(&["app.test"]);
        assert!(d.is_allowed("https://app.test/").is_ok());
        assert!(d.is_allowed("https://evil.test/").is_err());
    }

    #[test]
    fn test_action_script_escapes_values() {
        let script = action_script(&Action::enter_text("input[name=\"q\"]", "a\"b')")).unwrap();
        assert!(script.contains(r#"document.querySelector("input[name=\"q\"]")"#));
        assert!(script.contains(r#"el.value = "a\"b')";"#));
    }

    #[test]
    fn test_action_script_rejects_navigate() {
        assert!(action_script(&Action::navigate("https://app.test")).is_err());
    }
}
