// ==========================================
// HACCP 过程控制系统 - 预警实体
// ==========================================
// 不变式: 超限日志与预警在同一事务内创建,
//         不存在无预警的超限日志
// ==========================================

use crate::domain::monitoring::{MonitoringLog, MonitoringRequirement};
use crate::domain::types::DeviationSeverity;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// Alert - 偏差预警
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub process_id: String,
    pub stage_id: String,
    pub requirement_id: String,
    /// 触发本预警的监测日志
    pub log_id: String,
    /// 严重度镜像自触发日志的 deviation_severity
    pub severity: DeviationSeverity,
    pub message: String,
    /// 当且仅当被违反的要求是关键限值时为 true
    pub requires_immediate_action: bool,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<NaiveDateTime>,
    pub resolution_notes: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Alert {
    /// 由超限日志构造预警
    pub fn from_deviation(log: &MonitoringLog, requirement: &MonitoringRequirement) -> Self {
        let message = match log.measured_value {
            Some(v) => format!(
                "参数 {} 超出容差窗口: 实测 {} {}, 容差 [{}, {}]",
                requirement.parameter_name,
                v,
                requirement.unit.as_deref().unwrap_or(""),
                requirement
                    .tolerance_min
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "-∞".to_string()),
                requirement
                    .tolerance_max
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "+∞".to_string()),
            ),
            None => format!("参数 {} 超出容差窗口", requirement.parameter_name),
        };

        Self {
            alert_id: Uuid::new_v4().to_string(),
            process_id: log.process_id.clone(),
            stage_id: log.stage_id.clone(),
            requirement_id: requirement.requirement_id.clone(),
            log_id: log.log_id.clone(),
            severity: log.deviation_severity,
            message,
            requires_immediate_action: requirement.is_critical_limit,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            created_at: log.recorded_at,
        }
    }
}
