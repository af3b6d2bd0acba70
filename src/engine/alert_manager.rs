// ==========================================
// HACCP 过程控制系统 - 预警管理器
// ==========================================
// 职责: 由分类后的偏差创建/解决预警,维护阻断阶段完成的预警集合
// 红线: 预警与触发日志同一事务写入,
//       不存在"超限日志已落库而预警缺失"的中间态
// 红线: 通知投递走旁路 outbox,永不阻塞控制路径
// ==========================================

use crate::domain::alert::Alert;
use crate::domain::monitoring::{MonitoringLog, MonitoringRequirement};
use crate::domain::types::PassFailStatus;
use crate::engine::error::EngineResult;
use crate::engine::events::{NotificationEvent, OptionalNotificationPublisher};
use crate::repository::{AlertRepository, MonitoringLogRepository};
use std::sync::Arc;
use tracing::{info, warn};

// ==========================================
// AlertManager - 预警管理器
// ==========================================
pub struct AlertManager {
    log_repo: Arc<MonitoringLogRepository>,
    alert_repo: Arc<AlertRepository>,
    publisher: OptionalNotificationPublisher,
}

impl AlertManager {
    pub fn new(
        log_repo: Arc<MonitoringLogRepository>,
        alert_repo: Arc<AlertRepository>,
        publisher: OptionalNotificationPublisher,
    ) -> Self {
        Self {
            log_repo,
            alert_repo,
            publisher,
        }
    }

    /// 持久化一条监测日志,超限时在同一事务内创建预警
    ///
    /// # 参数
    /// - log: 已分类的监测日志
    /// - requirement: 被采样的监测要求
    ///
    /// # 返回
    /// - Ok(Some(Alert)): 日志超限,预警已创建
    /// - Ok(None): 日志限值内或采集跳过,无预警
    ///
    /// # 说明
    /// 预警严重度镜像日志的 deviation_severity;
    /// requires_immediate_action 当且仅当要求为关键限值。
    pub fn persist_log(
        &self,
        log: &MonitoringLog,
        requirement: &MonitoringRequirement,
    ) -> EngineResult<Option<Alert>> {
        let alert = if !log.within_limits && log.pass_fail_status == PassFailStatus::Fail {
            Some(Alert::from_deviation(log, requirement))
        } else {
            None
        };

        self.log_repo.insert_with_alert(log, alert.as_ref())?;

        if let Some(alert) = &alert {
            warn!(
                alert_id = %alert.alert_id,
                process_id = %alert.process_id,
                stage_id = %alert.stage_id,
                severity = %alert.severity,
                requires_immediate_action = alert.requires_immediate_action,
                "监测超限,预警已创建"
            );

            self.publisher.publish(NotificationEvent::AlertRaised {
                alert_id: alert.alert_id.clone(),
                process_id: alert.process_id.clone(),
                stage_id: alert.stage_id.clone(),
                severity: alert.severity,
                requires_immediate_action: alert.requires_immediate_action,
                message: alert.message.clone(),
            });
        }

        Ok(alert)
    }

    /// 解决预警
    ///
    /// # 返回
    /// - Ok(Alert): 更新后的预警
    /// - Err(NotFound): 预警不存在
    /// - Err(AlreadyResolved): 重复解决
    pub fn resolve_alert(
        &self,
        alert_id: &str,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> EngineResult<Alert> {
        let now = chrono::Utc::now().naive_utc();
        let alert = self.alert_repo.resolve(alert_id, resolved_by, notes, now)?;

        info!(
            alert_id = %alert.alert_id,
            resolved_by = %resolved_by,
            "预警已解决"
        );

        self.publisher.publish(NotificationEvent::AlertResolved {
            alert_id: alert.alert_id.clone(),
            process_id: alert.process_id.clone(),
            resolved_by: resolved_by.to_string(),
        });

        Ok(alert)
    }

    /// 查询过程的未解决预警,可按阶段过滤
    pub fn list_open_alerts(
        &self,
        process_id: &str,
        stage_id: Option<&str>,
    ) -> EngineResult<Vec<Alert>> {
        Ok(self.alert_repo.list_open(process_id, stage_id)?)
    }
}
