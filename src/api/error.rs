// ==========================================
// HACCP 过程控制系统 - API 层错误类型
// ==========================================
// 职责: 定义 API 层错误类型,转换引擎/仓储错误为调用方可消费的错误
// 红线: 错误信息必须包含显式原因(可解释性)
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API 层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("状态冲突: {0}")]
    StateConflict(String),

    #[error("阶段未就绪: {}", blocking_issues.join("; "))]
    ReadinessNotMet { blocking_issues: Vec<String> },

    #[error("并发冲突: {0}")]
    ConcurrencyConflict(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("预警已解决: {0}")]
    AlreadyResolved(String),

    #[error("数据库错误: {0}")]
    DatabaseError(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => ApiError::InvalidInput(msg),
            EngineError::StateConflict {
                entity,
                current,
                required,
            } => ApiError::StateConflict(format!(
                "{} 当前状态 {}, 操作要求 {}",
                entity, current, required
            )),
            EngineError::ReadinessNotMet { blocking_issues } => {
                ApiError::ReadinessNotMet { blocking_issues }
            }
            EngineError::ConcurrencyConflict(msg) => ApiError::ConcurrencyConflict(msg),
            EngineError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{} with id={}", entity, id))
            }
            EngineError::AlreadyResolved(msg) => ApiError::AlreadyResolved(msg),
            EngineError::Repository(e) => ApiError::from(e),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{} with id={}", entity, id))
            }
            RepositoryError::ValidationError(msg) => ApiError::InvalidInput(msg),
            RepositoryError::AlreadyResolved(msg) => ApiError::AlreadyResolved(msg),
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

/// API 层结果类型别名
pub type ApiResult<T> = Result<T, ApiError>;
