use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 一次失败后的重试候选，依次交给各个重试观察者修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryCandidate {
    pub task_id: String,
    pub account_id: String,
    pub attempt: u32,
    pub is_async: bool,
    pub failed_delegate_id: Option<String>,
    pub failure_message: String,
    pub excluded_delegate_ids: BTreeSet<String>,
    pub delay: Duration,
    /// 被观察者设置后不再重试
    pub give_up_reason: Option<String>,
}

impl RetryCandidate {
    pub fn give_up(&mut self, reason: impl Into<String>) {
        if self.give_up_reason.is_none() {
            self.give_up_reason = Some(reason.into());
        }
    }

    pub fn should_retry(&self) -> bool {
        self.give_up_reason.is_none()
    }

    pub fn decision(&self) -> RetryDecision {
        match &self.give_up_reason {
            Some(reason) => RetryDecision::GiveUp {
                reason: reason.clone(),
            },
            None => RetryDecision::Retry {
                next_attempt: self.attempt + 1,
                delay: self.delay,
                excluded_delegate_ids: self.excluded_delegate_ids.clone(),
            },
        }
    }
}

/// 重试协调的最终决定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryDecision {
    Retry {
        next_attempt: u32,
        delay: Duration,
        excluded_delegate_ids: BTreeSet<String>,
    },
    GiveUp {
        reason: String,
    },
}
