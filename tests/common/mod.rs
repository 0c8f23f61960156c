//! 集成测试共用的模拟应用与脚本化决策后端

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use forager::actions::{Action, ActionKind, ActionTarget, CssSelectorSanitizer};
use forager::core::{CollaboratorFactory, Collaborators, ExploreError, StartRequest};
use forager::decision::{DecisionProvider, DecisionResult, HeuristicDecisionProvider, Hints, ProviderReply};
use forager::perception::{render_snapshot, Observation, PerceptionSource, SnapshotElement};
use forager::persistence::MemorySink;

pub const START: &str = "https://app.test/";

struct Page {
    snapshot: String,
    /// selector -> 激活后跳转到的 locator（None 表示停留在当前页）
    links: Vec<(String, Option<String>)>,
}

/// 状态图形式的模拟 Web 应用，同时充当感知源与动作目标
#[derive(Default)]
pub struct SimulatedApp {
    pages: HashMap<String, Page>,
    failing: HashSet<String>,
    hold: bool,
    current: Mutex<Option<String>>,
    navigations: Mutex<Vec<Option<String>>>,
    applied: Mutex<Vec<Action>>,
    released: AtomicBool,
    release_calls: AtomicUsize,
}

impl SimulatedApp {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加页面；links 为 (selector, 跳转目标)
    pub fn page(mut self, locator: &str, title: &str, links: &[(&str, Option<&str>)]) -> Self {
        let elements: Vec<SnapshotElement> = links
            .iter()
            .map(|(selector, _)| SnapshotElement {
                selector: selector.to_string(),
                role: "button".to_string(),
                name: selector.trim_start_matches('#').to_string(),
            })
            .collect();
        self.pages.insert(
            locator.to_string(),
            Page {
                snapshot: render_snapshot(title, locator, &elements, 8000),
                links: links
                    .iter()
                    .map(|(s, to)| (s.to_string(), to.map(String::from)))
                    .collect(),
            },
        );
        self
    }

    /// 激活该选择器时返回失败
    pub fn failing(mut self, selector: &str) -> Self {
        self.failing.insert(selector.to_string());
        self
    }

    /// observe 一直挂起直到被释放（模拟长时间运行的会话）
    pub fn hold(mut self) -> Self {
        self.hold = true;
        self
    }

    pub fn navigations(&self) -> Vec<Option<String>> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn applied(&self) -> Vec<Action> {
        self.applied.lock().unwrap().clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    fn mark_released(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.release_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PerceptionSource for SimulatedApp {
    async fn observe(&self, locator: Option<&str>) -> Result<Observation, String> {
        self.navigations
            .lock()
            .unwrap()
            .push(locator.map(String::from));
        while self.hold && !self.is_released() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if self.is_released() {
            return Err("released".to_string());
        }

        let mut current = self.current.lock().unwrap();
        if let Some(locator) = locator {
            if !self.pages.contains_key(locator) {
                return Err(format!("unreachable: {locator}"));
            }
            *current = Some(locator.to_string());
        }
        let locator = current.clone().ok_or("nothing loaded")?;
        let page = &self.pages[&locator];
        Ok(Observation {
            locator: locator.clone(),
            snapshot: page.snapshot.clone(),
            affordances: page.links.iter().map(|(s, _)| s.clone()).collect(),
        })
    }

    async fn release(&self) {
        self.mark_released();
    }
}

#[async_trait]
impl ActionTarget for SimulatedApp {
    async fn apply(&self, action: &Action) -> Result<(), String> {
        if self.is_released() {
            return Err("released".to_string());
        }
        let target = action.target.clone().unwrap_or_default();
        if self.failing.contains(&target) {
            return Err("element detached".to_string());
        }
        let mut current = self.current.lock().unwrap();
        let locator = current.clone().ok_or("nothing loaded")?;
        let page = &self.pages[&locator];
        let link = page
            .links
            .iter()
            .find(|(s, _)| *s == target)
            .ok_or_else(|| format!("no such element: {target}"))?;
        if action.kind == ActionKind::Activate {
            if let Some(next) = &link.1 {
                *current = Some(next.clone());
            }
        }
        self.applied.lock().unwrap().push(action.clone());
        Ok(())
    }

    async fn release(&self) {
        self.mark_released();
    }
}

/// 按顺序返回预置回复；耗尽后结束探索
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ProviderReply>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<ProviderReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait]
impl DecisionProvider for ScriptedProvider {
    async fn decide(&self, _: &str, _: &[String], _: &Hints) -> Result<ProviderReply, String> {
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ProviderReply::Decision(DecisionResult::terminal("script exhausted"))))
    }
}

pub fn collaborators(
    app: Arc<SimulatedApp>,
    decision: Arc<dyn DecisionProvider>,
    sink: Arc<MemorySink>,
) -> Collaborators {
    Collaborators {
        perception: app.clone(),
        decision,
        target: app,
        sink,
        sanitizer: Arc::new(CssSelectorSanitizer),
    }
}

/// 为每个会话构造新的模拟应用，并保留引用供断言
pub struct SimFactory {
    make: Box<dyn Fn() -> SimulatedApp + Send + Sync>,
    pub apps: Mutex<Vec<Arc<SimulatedApp>>>,
    pub sinks: Mutex<Vec<Arc<MemorySink>>>,
}

impl SimFactory {
    pub fn new(make: impl Fn() -> SimulatedApp + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            apps: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
        }
    }

    pub fn app(&self, index: usize) -> Arc<SimulatedApp> {
        self.apps.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl CollaboratorFactory for SimFactory {
    async fn create(&self, request: &StartRequest) -> Result<Collaborators, ExploreError> {
        if request.target_locator.is_empty() {
            return Err(ExploreError::ConfigError("empty target".into()));
        }
        let app = Arc::new((self.make)());
        let sink = Arc::new(MemorySink::new());
        self.apps.lock().unwrap().push(app.clone());
        self.sinks.lock().unwrap().push(sink.clone());
        Ok(collaborators(app, Arc::new(HeuristicDecisionProvider::new()), sink))
    }
}

/// 线性三页应用：home -> form -> done
pub fn linear_app() -> SimulatedApp {
    SimulatedApp::new()
        .page(START, "Home", &[("#next", Some("https://app.test/form"))])
        .page("https://app.test/form", "Form", &[("#submit", Some("https://app.test/done"))])
        .page("https://app.test/done", "Done", &[])
}
