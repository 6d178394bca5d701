use serde::{Deserialize, Serialize};

use crate::SchedulerResult;

/// Delegate上报的命令执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandExecutionStatus {
    Success,
    Failure,
    Running,
    Queued,
    Skipped,
}

/// 正常执行完成后的响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecutionResponse {
    pub status: CommandExecutionStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl TaskExecutionResponse {
    pub fn success(payload: Vec<u8>) -> Self {
        Self {
            status: CommandExecutionStatus::Success,
            error_message: None,
            error_code: None,
            payload,
        }
    }

    pub fn failure(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            status: CommandExecutionStatus::Failure,
            error_message: Some(message.into()),
            error_code: code,
            payload: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandExecutionStatus::Success
    }
}

/// Delegate返回的响应数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResponseData {
    /// 执行过程中的错误通知（包括过期）
    ErrorNotify {
        error_message: String,
        #[serde(default)]
        error_code: Option<String>,
        #[serde(default)]
        expired: bool,
    },
    /// 远端方法调用抛出的异常
    RemoteException { message: String },
    Execution(TaskExecutionResponse),
    #[serde(other)]
    Unknown,
}

impl TaskResponseData {
    pub fn error_notify(message: impl Into<String>) -> Self {
        TaskResponseData::ErrorNotify {
            error_message: message.into(),
            error_code: None,
            expired: false,
        }
    }

    pub fn expired(message: impl Into<String>) -> Self {
        TaskResponseData::ErrorNotify {
            error_message: message.into(),
            error_code: None,
            expired: true,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskResponseData::Execution(response) if response.is_success())
    }

    /// 失败原因，成功时为 `None`
    pub fn failure_message(&self) -> Option<String> {
        match self {
            TaskResponseData::ErrorNotify { error_message, .. } => Some(error_message.clone()),
            TaskResponseData::RemoteException { message } => Some(message.clone()),
            TaskResponseData::Execution(response) if response.is_success() => None,
            TaskResponseData::Execution(response) => Some(
                response
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("执行状态: {:?}", response.status)),
            ),
            TaskResponseData::Unknown => Some("未知的响应类型".to_string()),
        }
    }

    pub fn encode(&self) -> SchedulerResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> SchedulerResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_response_type() {
        let decoded = TaskResponseData::decode(br#"{"type":"SOMETHING_ELSE"}"#).unwrap();
        assert_eq!(decoded, TaskResponseData::Unknown);
        assert!(decoded.failure_message().is_some());
    }

    #[test]
    fn test_execution_response_wire_shape() {
        let decoded =
            TaskResponseData::decode(br#"{"type":"EXECUTION","status":"SUCCESS"}"#).unwrap();
        assert!(decoded.is_success());
        assert_eq!(decoded.failure_message(), None);
    }

    #[test]
    fn test_failure_message() {
        let response = TaskResponseData::Execution(TaskExecutionResponse::failure("disk full", None));
        assert_eq!(response.failure_message().as_deref(), Some("disk full"));
        assert_eq!(
            TaskResponseData::expired("Task expired").failure_message().as_deref(),
            Some("Task expired")
        );
    }
}
