// ==========================================
// HACCP 过程控制系统 - 监测 API
// ==========================================
// 职责: 监测周期手动触发、就绪评估、监测状态与预警操作
// ==========================================

use crate::api::error::ApiResult;
use crate::domain::alert::Alert;
use crate::engine::alert_manager::AlertManager;
use crate::engine::readiness::{Readiness, ReadinessEvaluator};
use crate::engine::scheduler::{CycleResult, MonitoringScheduler, MonitoringStatus};
use std::sync::Arc;

// ==========================================
// MonitoringApi - 监测 API
// ==========================================
pub struct MonitoringApi {
    scheduler: Arc<MonitoringScheduler>,
    readiness: Arc<ReadinessEvaluator>,
    alert_manager: Arc<AlertManager>,
}

impl MonitoringApi {
    pub fn new(
        scheduler: Arc<MonitoringScheduler>,
        readiness: Arc<ReadinessEvaluator>,
        alert_manager: Arc<AlertManager>,
    ) -> Self {
        Self {
            scheduler,
            readiness,
            alert_manager,
        }
    }

    /// 手动触发一次监测周期
    ///
    /// # 错误
    /// - ConcurrencyConflict: 同阶段已有周期在执行
    pub async fn execute_cycle(&self, process_id: &str) -> ApiResult<CycleResult> {
        Ok(self.scheduler.execute_cycle(process_id).await?)
    }

    /// 评估阶段完成就绪度
    pub fn evaluate_stage_completion(&self, stage_id: &str) -> ApiResult<Readiness> {
        Ok(self.readiness.evaluate_stage_completion(stage_id)?)
    }

    /// 查询过程监测状态
    pub fn get_monitoring_status(&self, process_id: &str) -> ApiResult<MonitoringStatus> {
        Ok(self.scheduler.monitoring_status(process_id)?)
    }

    /// 解决预警
    pub fn resolve_alert(
        &self,
        alert_id: &str,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> ApiResult<Alert> {
        Ok(self.alert_manager.resolve_alert(alert_id, resolved_by, notes)?)
    }

    /// 查询过程未解决预警,可按阶段过滤
    pub fn list_open_alerts(
        &self,
        process_id: &str,
        stage_id: Option<&str>,
    ) -> ApiResult<Vec<Alert>> {
        Ok(self.alert_manager.list_open_alerts(process_id, stage_id)?)
    }
}
