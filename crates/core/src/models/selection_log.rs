use serde::{Deserialize, Serialize};

/// 一次分配判定的原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionReason {
    DelegateNotFound,
    DelegateDisabled,
    AccountMismatch,
    Excluded,
    CapabilityUnmatched { capability: String },
    /// 所有已知能力都满足，仍有能力等待Delegate验证
    PendingValidation,
    CapabilityMatched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionLogEntry {
    pub delegate_id: String,
    pub eligible: bool,
    pub reason: SelectionReason,
}

/// 单次任务评估的Delegate选择日志，按评估顺序记录每个候选者
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionLog {
    pub task_id: String,
    pub entries: Vec<SelectionLogEntry>,
}

impl SelectionLog {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, delegate_id: &str, eligible: bool, reason: SelectionReason) {
        self.entries.push(SelectionLogEntry {
            delegate_id: delegate_id.to_string(),
            eligible,
            reason,
        });
    }

    pub fn entries_for<'a>(&'a self, delegate_id: &'a str) -> impl Iterator<Item = &'a SelectionLogEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.delegate_id == delegate_id)
    }

    pub fn eligible_delegates(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.eligible)
            .map(|entry| entry.delegate_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
