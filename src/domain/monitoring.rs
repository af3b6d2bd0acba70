// ==========================================
// HACCP 过程控制系统 - 监测实体
// ==========================================
// MonitoringRequirement: 阶段活动期间必须采样的参数
// MonitoringLog: 一次采样观测,只追加,创建后不可变
// MonitoringTask: 持久化调度注册表项(重启可恢复)
// ==========================================

use crate::domain::types::{
    DeviationSeverity, ParameterType, PassFailStatus, SamplingFrequency, TaskScheduleState,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// MonitoringRequirement - 监测要求
// ==========================================
// 红线: 阶段开始产生日志后不可变更;修订 = 新版本行 + supersedes_id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringRequirement {
    pub requirement_id: String,
    pub stage_id: String,
    pub parameter_name: String,
    pub parameter_type: ParameterType,
    /// 强制要求: 就绪评估要求该参数必须有数据
    pub is_mandatory: bool,
    /// 关键限值: 超限即 CRITICAL,阻断阶段完成
    pub is_critical_limit: bool,
    pub target_value: Option<f64>,
    /// 容差下限(None 表示该侧无界)
    pub tolerance_min: Option<f64>,
    /// 容差上限(None 表示该侧无界)
    pub tolerance_max: Option<f64>,
    pub unit: Option<String>,
    pub frequency: SamplingFrequency,
    /// 是否当前生效版本(修订后旧版本置 false)
    pub is_active: bool,
    /// 被本行取代的旧版本要求 ID
    pub supersedes_id: Option<String>,
}

impl MonitoringRequirement {
    pub fn from_template(stage_id: &str, tpl: &RequirementTemplate) -> Self {
        Self {
            requirement_id: Uuid::new_v4().to_string(),
            stage_id: stage_id.to_string(),
            parameter_name: tpl.parameter_name.clone(),
            parameter_type: tpl.parameter_type,
            is_mandatory: tpl.is_mandatory,
            is_critical_limit: tpl.is_critical_limit,
            target_value: tpl.target_value,
            tolerance_min: tpl.tolerance_min,
            tolerance_max: tpl.tolerance_max,
            unit: tpl.unit.clone(),
            frequency: tpl.frequency,
            is_active: true,
            supersedes_id: None,
        }
    }
}

/// 监测要求模板(创建过程时随阶段模板一起提供)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementTemplate {
    pub parameter_name: String,
    pub parameter_type: ParameterType,
    pub is_mandatory: bool,
    pub is_critical_limit: bool,
    pub target_value: Option<f64>,
    pub tolerance_min: Option<f64>,
    pub tolerance_max: Option<f64>,
    pub unit: Option<String>,
    pub frequency: SamplingFrequency,
}

// ==========================================
// MonitoringLog - 监测日志
// ==========================================
// 只追加;即使阶段被回退,日志为审计目的独立留存
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringLog {
    pub log_id: String,
    pub requirement_id: String,
    pub stage_id: String,
    pub process_id: String,
    pub recorded_at: NaiveDateTime,
    /// 采集失败(SKIPPED)时为 None
    pub measured_value: Option<f64>,
    pub within_limits: bool,
    pub pass_fail_status: PassFailStatus,
    pub deviation_severity: DeviationSeverity,
    /// 采集方式(传感器/人工录入)
    pub measurement_method: Option<String>,
    pub equipment_id: Option<String>,
}

// ==========================================
// MonitoringTask - 持久化调度注册表项
// ==========================================
// 取代源系统的内存字典: (process_id, stage_id) 主键,
// 启动时按 IN_PROGRESS 阶段集合重建
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringTask {
    pub process_id: String,
    pub stage_id: String,
    pub state: TaskScheduleState,
    pub cycle_interval_minutes: i64,
    pub updated_at: NaiveDateTime,
}
