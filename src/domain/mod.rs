// ==========================================
// HACCP 过程控制系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务规则接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod alert;
pub mod monitoring;
pub mod process;
pub mod transition;
pub mod types;

// 重导出核心类型
pub use alert::Alert;
pub use monitoring::{
    MonitoringLog, MonitoringRequirement, MonitoringTask, RequirementTemplate,
};
pub use process::{ProcessStage, ProductionProcess, StageTemplate};
pub use transition::TransitionRecord;
pub use types::{
    ComplianceStatus, DeviationSeverity, ParameterType, PassFailStatus, ProcessStatus,
    SamplingFrequency, StageStatus, TaskScheduleState, TransitionType,
};
