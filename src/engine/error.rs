// ==========================================
// HACCP 过程控制系统 - 引擎层错误类型
// ==========================================
// 错误传播策略:
// - Collector 错误在调度器内完全恢复(记 SKIPPED 日志,下周期重试),
//   永不沿转换路径向上传播
// - 其余错误原样向调用方抛出
// - EMERGENCY 转换抑制 ReadinessNotMet,但在审计记录中登记绕过
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 输入校验 =====
    #[error("输入校验失败: {0}")]
    Validation(String),

    // ===== 状态冲突 =====
    #[error("状态冲突: {entity} 当前状态 {current}, 操作要求 {required}")]
    StateConflict {
        entity: String,
        current: String,
        required: String,
    },

    // ===== 就绪门控 =====
    #[error("阶段未就绪,存在 {} 项阻断问题", blocking_issues.len())]
    ReadinessNotMet { blocking_issues: Vec<String> },

    // ===== 并发冲突 =====
    #[error("并发冲突: {0}")]
    ConcurrencyConflict(String),

    // ===== 查找类 =====
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("预警已解决: {0}")]
    AlreadyResolved(String),

    // ===== 底层透传 =====
    #[error("仓储访问失败: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            RepositoryError::AlreadyResolved(msg) => EngineError::AlreadyResolved(msg),
            RepositoryError::ValidationError(msg) => EngineError::Validation(msg),
            other => EngineError::Repository(other),
        }
    }
}

/// 引擎层结果类型别名
pub type EngineResult<T> = Result<T, EngineError>;
