//! 启发式决策后端：无需模型，依次激活尚未探索的元素

use async_trait::async_trait;

use crate::actions::Action;
use crate::decision::{Capability, DecisionProvider, DecisionResult, Hints, ProviderReply};

#[derive(Debug, Default)]
pub struct HeuristicDecisionProvider;

impl HeuristicDecisionProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DecisionProvider for HeuristicDecisionProvider {
    async fn decide(
        &self,
        _snapshot: &str,
        _history_tail: &[String],
        hints: &Hints,
    ) -> Result<ProviderReply, String> {
        // 有未处理的模态框时先关闭它
        let dismiss = hints.capabilities.iter().find_map(|c| match c {
            Capability::Modal { dismiss: Some(d) } if hints.unexplored_actions.contains(d) => Some(d),
            _ => None,
        });

        let decision = match dismiss.or_else(|| hints.unexplored_actions.first()) {
            Some(target) => DecisionResult::Single(Action::activate(target.clone())),
            None => DecisionResult::terminal("no unexplored elements"),
        };
        Ok(ProviderReply::Decision(decision))
    }
}
