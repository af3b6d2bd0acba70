// ==========================================
// HACCP 过程控制系统 - 生产过程实体
// ==========================================
// 所有权: ProductionProcess 独占其 ProcessStage (级联生命周期)
// 红线: 过程 IN_PROGRESS 时有且仅有一个阶段 IN_PROGRESS
// ==========================================

use crate::domain::types::{ProcessStatus, StageStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// ProductionProcess - 生产过程(一个批次对过程模板的一次执行)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionProcess {
    pub process_id: String,
    /// 过程名称(来自过程模板)
    pub name: String,
    /// 批次号
    pub batch_no: String,
    pub status: ProcessStatus,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
}

impl ProductionProcess {
    /// 创建 DRAFT 状态的新过程
    pub fn new_draft(name: String, batch_no: String, created_by: String) -> Self {
        Self {
            process_id: Uuid::new_v4().to_string(),
            name,
            batch_no,
            status: ProcessStatus::Draft,
            started_at: None,
            ended_at: None,
            created_by,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

// ==========================================
// ProcessStage - 过程阶段(有序控制点)
// ==========================================
// 不变式: sequence_order 在过程内唯一且从 1 连续
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStage {
    pub stage_id: String,
    pub process_id: String,
    pub name: String,
    /// 执行顺序,过程内唯一,从 1 连续编号
    pub sequence_order: i32,
    pub status: StageStatus,
    /// 关键控制点 (CCP)
    pub is_critical_control_point: bool,
    /// 操作性前提方案 (OPRP)
    pub is_operational_prp: bool,
    pub actual_start: Option<NaiveDateTime>,
    pub actual_end: Option<NaiveDateTime>,
    /// 就绪评估窗口起点: 初始等于 actual_start, REWORK 时重置
    pub readiness_window_start: Option<NaiveDateTime>,
}

impl ProcessStage {
    pub fn new_pending(
        process_id: String,
        name: String,
        sequence_order: i32,
        is_ccp: bool,
        is_oprp: bool,
    ) -> Self {
        Self {
            stage_id: Uuid::new_v4().to_string(),
            process_id,
            name,
            sequence_order,
            status: StageStatus::Pending,
            is_critical_control_point: is_ccp,
            is_operational_prp: is_oprp,
            actual_start: None,
            actual_end: None,
            readiness_window_start: None,
        }
    }

    /// 阶段是否处于活动状态(可接收监测采样)
    pub fn is_active(&self) -> bool {
        self.status == StageStatus::InProgress
    }
}

// ==========================================
// 阶段模板定义(创建过程时使用)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTemplate {
    pub name: String,
    pub is_critical_control_point: bool,
    pub is_operational_prp: bool,
    pub requirements: Vec<crate::domain::monitoring::RequirementTemplate>,
}
