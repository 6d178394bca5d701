use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("周期任务未找到: {id}")]
    PerpetualTaskNotFound { id: String },

    #[error("没有符合条件的Delegate可以执行任务: {task_id}")]
    NoEligibleDelegates { task_id: String },

    #[error("任务执行超时")]
    ExecutionTimeout,

    /// 等待响应的通道在响应到达之前被关闭
    #[error("请求被中断: {0}")]
    Request(String),

    /// 远端Delegate返回的执行错误，message 原样展示
    #[error("{message}")]
    Server {
        message: String,
        code: Option<String>,
    },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("无效的参数: {0}")]
    InvalidArgument(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn server(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Server {
            message: message.into(),
            code,
        }
    }

    /// 本地传输层错误（超时或中断），这类错误在执行器层面不再重试
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::ExecutionTimeout | Self::Request(_))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
