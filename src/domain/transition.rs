// ==========================================
// HACCP 过程控制系统 - 阶段转换审计记录
// ==========================================
// 只追加;EMERGENCY 绕过就绪检查时 bypassed_checks 必须为 true
// ==========================================

use crate::domain::types::TransitionType;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// TransitionRecord - 转换审计记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub record_id: String,
    pub process_id: String,
    pub stage_id: String,
    pub transition_type: TransitionType,
    pub requested_by: String,
    /// ROLLBACK/SKIP 等需要的理由或审批说明
    pub reason: Option<String>,
    /// 是否绕过了就绪评估(EMERGENCY 为 true)
    pub bypassed_checks: bool,
    /// ROLLBACK 的目标早前阶段
    pub target_stage_id: Option<String>,
    pub created_at: NaiveDateTime,
}

impl TransitionRecord {
    pub fn new(
        process_id: &str,
        stage_id: &str,
        transition_type: TransitionType,
        requested_by: &str,
        reason: Option<String>,
        bypassed_checks: bool,
        target_stage_id: Option<String>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            process_id: process_id.to_string(),
            stage_id: stage_id.to_string(),
            transition_type,
            requested_by: requested_by.to_string(),
            reason,
            bypassed_checks,
            target_stage_id,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}
