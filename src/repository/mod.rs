// ==========================================
// HACCP 过程控制系统 - 数据仓储层
// ==========================================
// 职责: 封装 SQLite 数据访问
// 红线: Repository 不含业务逻辑,只负责数据存取
// ==========================================

pub mod alert_repo;
pub mod error;
pub mod monitoring_repo;
pub mod process_repo;
pub mod task_repo;
pub mod transition_repo;

pub use alert_repo::AlertRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use monitoring_repo::{MonitoringLogRepository, MonitoringRequirementRepository};
pub use process_repo::{ProcessStageRepository, ProductionProcessRepository};
pub use task_repo::MonitoringTaskRepository;
pub use transition_repo::TransitionRecordRepository;

use chrono::NaiveDateTime;

/// 时间戳统一存储格式
pub(crate) const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 格式化时间戳为数据库存储格式
pub(crate) fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// 解析数据库时间戳
pub(crate) fn parse_ts(s: &str) -> RepositoryResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).map_err(|e| RepositoryError::FieldValueError {
        field: "timestamp".to_string(),
        message: format!("无法解析时间戳 '{}': {}", s, e),
    })
}

/// 解析可空时间戳
pub(crate) fn parse_opt_ts(s: Option<String>) -> RepositoryResult<Option<NaiveDateTime>> {
    match s {
        Some(v) => Ok(Some(parse_ts(&v)?)),
        None => Ok(None),
    }
}
