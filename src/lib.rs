// ==========================================
// HACCP 过程控制系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + Tokio
// 系统定位: 生产过程阶段生命周期控制 + 周期监测调度
// 说明: HTTP 外壳/鉴权/通知投递/报表为外部协作方,不在本库范围
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施(连接初始化/PRAGMA/schema 统一)
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    ComplianceStatus, DeviationSeverity, ParameterType, PassFailStatus, ProcessStatus,
    SamplingFrequency, StageStatus, TaskScheduleState, TransitionType,
};

// 领域实体
pub use domain::{
    Alert, MonitoringLog, MonitoringRequirement, MonitoringTask, ProcessStage,
    ProductionProcess, RequirementTemplate, StageTemplate, TransitionRecord,
};

// 引擎
pub use engine::{
    AlertManager, DeviationClassifier, MonitoringScheduler, ProcessStageMachine,
    ReadinessEvaluator,
};

// API
pub use api::{MonitoringApi, ProcessApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "HACCP 生产过程合规监控系统";

// ==========================================
// 预编译检查
// ==========================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
