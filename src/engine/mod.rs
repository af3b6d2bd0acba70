// ==========================================
// HACCP 过程控制系统 - 引擎层
// ==========================================
// 职责: 业务规则的唯一归属层
// 五大引擎:
//   DeviationClassifier  偏差分类(纯函数)
//   AlertManager         预警创建/解决
//   MonitoringScheduler  周期监测调度
//   ReadinessEvaluator   阶段完成就绪门控
//   ProcessStageMachine  阶段状态机(五类转换)
// ==========================================

pub mod alert_manager;
pub mod classifier;
pub mod collector;
pub mod error;
pub mod events;
pub mod readiness;
pub mod scheduler;
pub mod stage_machine;

// 重导出核心类型
pub use alert_manager::AlertManager;
pub use classifier::{Classification, DeviationClassifier};
pub use collector::{CollectedSample, ParameterCollector};
pub use error::{EngineError, EngineResult};
pub use events::{
    ChannelNotificationPublisher, NoOpNotificationPublisher, NotificationEvent,
    NotificationPublisher, OptionalNotificationPublisher,
};
pub use readiness::{Readiness, ReadinessEvaluator};
pub use scheduler::{
    CycleResult, DeviationDetail, MonitoringScheduler, MonitoringStatus, RequirementStatus,
};
pub use stage_machine::{ProcessStageMachine, TransitionRequest, TransitionResult};
