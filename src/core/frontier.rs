//! Frontier 与回溯栈
//!
//! 每个已发现状态记录「发现过的动作」与「已执行的动作」；回溯栈保存仍有未探索动作的状态，
//! 当前分支走到尽头时从栈中恢复到兄弟分支，而不是直接结束。
//!
//! frontier 是唯一事实来源：visited 视图由首次发现顺序派生，不单独维护。

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::core::fingerprint::Fingerprint;

/// 单个状态的探索记录；不变式 explored_actions ⊆ available_actions
#[derive(Debug, Clone)]
pub struct FrontierRecord {
    pub fingerprint: Fingerprint,
    pub locator: String,
    available_actions: BTreeSet<String>,
    explored_actions: BTreeSet<String>,
    pub parent_fingerprint: Option<Fingerprint>,
}

impl FrontierRecord {
    fn new(fingerprint: Fingerprint, locator: String, parent: Option<Fingerprint>) -> Self {
        Self {
            fingerprint,
            locator,
            available_actions: BTreeSet::new(),
            explored_actions: BTreeSet::new(),
            parent_fingerprint: parent,
        }
    }

    pub fn available_actions(&self) -> &BTreeSet<String> {
        &self.available_actions
    }

    pub fn explored_actions(&self) -> &BTreeSet<String> {
        &self.explored_actions
    }

    pub fn unexplored_count(&self) -> usize {
        self.available_actions.len() - self.explored_actions.len()
    }

    /// 尚未执行的动作（有序，便于确定性决策）
    pub fn unexplored_actions(&self) -> Vec<String> {
        self.available_actions
            .difference(&self.explored_actions)
            .cloned()
            .collect()
    }
}

/// 回溯目标；unexplored_count 在入栈与出栈选择时都从 frontier 重新计算
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacktrackTarget {
    pub fingerprint: Fingerprint,
    pub locator: String,
    pub unexplored_count: usize,
}

/// pop_next 的结果：选中的目标，以及被跳过的失效条目说明（写入 action_history）
#[derive(Debug, Default)]
pub struct PopResult {
    pub target: Option<BacktrackTarget>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Frontier {
    records: HashMap<Fingerprint, FrontierRecord>,
    /// 首次发现顺序（visited 视图）
    order: Vec<Fingerprint>,
    backtrack_stack: Vec<BacktrackTarget>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并一次观察：available 只增不减；parent 仅在首次创建时设置
    pub fn record_observation<I>(
        &mut self,
        fingerprint: &Fingerprint,
        locator: &str,
        discovered_actions: I,
        parent_fingerprint: Option<&Fingerprint>,
    ) where
        I: IntoIterator<Item = String>,
    {
        let record = self.records.entry(fingerprint.clone()).or_insert_with(|| {
            self.order.push(fingerprint.clone());
            FrontierRecord::new(
                fingerprint.clone(),
                locator.to_string(),
                parent_fingerprint.cloned(),
            )
        });
        record.available_actions.extend(discovered_actions);
    }

    /// 标记动作已执行；动作不在 available 中时不记录（保持子集不变式），返回是否生效
    pub fn mark_explored(&mut self, fingerprint: &Fingerprint, action_id: &str) -> bool {
        match self.records.get_mut(fingerprint) {
            Some(record) if record.available_actions.contains(action_id) => {
                record.explored_actions.insert(action_id.to_string())
            }
            _ => false,
        }
    }

    pub fn unexplored_count(&self, fingerprint: &Fingerprint) -> usize {
        self.records
            .get(fingerprint)
            .map(FrontierRecord::unexplored_count)
            .unwrap_or(0)
    }

    /// 仍有未探索动作且不在栈中时入栈，返回是否入栈
    pub fn push_if_unexplored(&mut self, fingerprint: &Fingerprint) -> bool {
        let Some(record) = self.records.get(fingerprint) else {
            return false;
        };
        let count = record.unexplored_count();
        if count == 0 || self.is_on_stack(fingerprint) {
            return false;
        }
        self.backtrack_stack.push(BacktrackTarget {
            fingerprint: fingerprint.clone(),
            locator: record.locator.clone(),
            unexplored_count: count,
        });
        true
    }

    /// 选出下一个回溯目标：未探索数最大者优先，相同则后入栈者优先（LIFO）。
    ///
    /// 记录已不存在的条目被跳过并留下说明；未探索数已归零的条目直接丢弃。
    pub fn pop_next(&mut self) -> PopResult {
        let mut result = PopResult::default();
        self.refresh_counts(&mut result.notes);
        let best = self
            .backtrack_stack
            .iter()
            .enumerate()
            .max_by_key(|(idx, t)| (t.unexplored_count, *idx))
            .map(|(idx, _)| idx);
        result.target = best.map(|idx| self.backtrack_stack.remove(idx));
        result
    }

    /// 重新计算栈内计数；缺失记录写说明后移除，计数为 0 的静默移除
    fn refresh_counts(&mut self, notes: &mut Vec<String>) {
        let records = &self.records;
        self.backtrack_stack.retain_mut(|t| match records.get(&t.fingerprint) {
            Some(record) => {
                t.unexplored_count = record.unexplored_count();
                t.unexplored_count > 0
            }
            None => {
                tracing::warn!(fingerprint = %t.fingerprint, "backtrack target without frontier record, skipped");
                notes.push(format!(
                    "backtrack skipped {}: frontier record missing",
                    t.fingerprint.short()
                ));
                false
            }
        });
    }

    pub fn is_on_stack(&self, fingerprint: &Fingerprint) -> bool {
        self.backtrack_stack.iter().any(|t| &t.fingerprint == fingerprint)
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&FrontierRecord> {
        self.records.get(fingerprint)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.records.contains_key(fingerprint)
    }

    /// 所有出现过的指纹，按首次发现顺序，无重复
    pub fn visited(&self) -> &[Fingerprint] {
        &self.order
    }

    pub fn backtrack_stack(&self) -> &[BacktrackTarget] {
        &self.backtrack_stack
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 整体终止条件：栈空且当前状态无未探索动作
    pub fn is_exhausted(&self, current: &Fingerprint) -> bool {
        self.backtrack_stack.is_empty() && self.unexplored_count(current) == 0
    }

    /// 仅测试使用：制造「栈中有指纹但记录缺失」的异常状态
    #[cfg(test)]
    pub(crate) fn forget(&mut self, fingerprint: &Fingerprint) {
        self.records.remove(fingerprint);
    }
}
