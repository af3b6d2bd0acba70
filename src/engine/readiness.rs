// ==========================================
// HACCP 过程控制系统 - 就绪评估引擎
// ==========================================
// 职责: 判定阶段的监测义务是否满足,为 NORMAL 转换提供门控
// 输入: 阶段窗口内监测日志 + 过程未解决预警(同一事务快照)
// 输出: Readiness { ready, blocking_issues, compliance_status }
// 红线: 只读评估,不产生任何写入
// ==========================================

use crate::domain::alert::Alert;
use crate::domain::monitoring::{MonitoringLog, MonitoringRequirement};
use crate::domain::types::{ComplianceStatus, DeviationSeverity, PassFailStatus};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::{
    MonitoringLogRepository, MonitoringRequirementRepository, ProcessStageRepository,
};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

// ==========================================
// Readiness - 就绪评估结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    /// 阻断/关注问题列表(未解决 WARNING 预警计入但不阻断)
    pub blocking_issues: Vec<String>,
    pub compliance_status: ComplianceStatus,
}

// ==========================================
// ReadinessEvaluator - 就绪评估引擎
// ==========================================
pub struct ReadinessEvaluator {
    stage_repo: Arc<ProcessStageRepository>,
    requirement_repo: Arc<MonitoringRequirementRepository>,
    log_repo: Arc<MonitoringLogRepository>,
    /// "近期失败"判定窗口(分钟)
    recent_failure_window_minutes: i64,
}

impl ReadinessEvaluator {
    pub fn new(
        stage_repo: Arc<ProcessStageRepository>,
        requirement_repo: Arc<MonitoringRequirementRepository>,
        log_repo: Arc<MonitoringLogRepository>,
        recent_failure_window_minutes: i64,
    ) -> Self {
        Self {
            stage_repo,
            requirement_repo,
            log_repo,
            recent_failure_window_minutes,
        }
    }

    /// 评估阶段完成就绪度
    ///
    /// # 算法
    /// 对阶段每个强制监测要求,检查就绪窗口(阶段实际开始,REWORK 时重置)内的日志:
    /// - 强制要求无任何有效采样 → 阻断 "无监测数据"
    /// - 关键限值要求存在 FAIL → 阻断 "关键限值失败"
    /// - 关键限值要求近期窗口内存在 FAIL → 阻断 "近期关键失败"
    /// - 过程存在未解决 CRITICAL 预警 → 无条件不就绪
    /// - 未解决 WARNING 预警计入问题列表,但单独不阻断
    pub fn evaluate_stage_completion(&self, stage_id: &str) -> EngineResult<Readiness> {
        self.evaluate_at(stage_id, chrono::Utc::now().naive_utc())
    }

    /// 以指定时刻评估(测试注入时钟用)
    pub fn evaluate_at(&self, stage_id: &str, now: NaiveDateTime) -> EngineResult<Readiness> {
        let stage = self.stage_repo.get_by_id(stage_id)?;

        let window_start = stage
            .readiness_window_start
            .or(stage.actual_start)
            .ok_or_else(|| EngineError::StateConflict {
                entity: format!("process_stage {}", stage_id),
                current: stage.status.to_string(),
                required: "已开始执行(存在就绪评估窗口)".to_string(),
            })?;

        let requirements = self.requirement_repo.find_active_by_stage(stage_id)?;

        // 日志与预警在同一事务内读取,保证快照一致
        let (logs, open_alerts) =
            self.log_repo
                .fetch_readiness_snapshot(&stage.process_id, stage_id, &window_start)?;

        let mut blocking_issues: Vec<String> = Vec::new();
        let mut has_critical_condition = false;

        for requirement in requirements.iter().filter(|r| r.is_mandatory) {
            self.check_requirement(
                requirement,
                &logs,
                now,
                &mut blocking_issues,
                &mut has_critical_condition,
            );
        }

        // 过程级未解决预警
        let mut warning_only_issues = 0usize;
        for alert in &open_alerts {
            match alert.severity {
                DeviationSeverity::Critical => {
                    has_critical_condition = true;
                    blocking_issues.push(format!(
                        "未解决关键预警: alert_id={}, {}",
                        alert.alert_id, alert.message
                    ));
                }
                DeviationSeverity::Warning => {
                    warning_only_issues += 1;
                    blocking_issues.push(format!(
                        "未解决警告预警: alert_id={}, {}",
                        alert.alert_id, alert.message
                    ));
                }
                _ => {}
            }
        }

        // WARNING 预警计入问题列表但单独不阻断
        let hard_blocks = blocking_issues.len() - warning_only_issues;
        let ready = hard_blocks == 0;

        let compliance_status = if has_critical_condition {
            ComplianceStatus::NonCompliant
        } else if !blocking_issues.is_empty() {
            ComplianceStatus::MinorIssues
        } else {
            ComplianceStatus::Compliant
        };

        debug!(
            stage_id = %stage_id,
            ready = ready,
            issues = blocking_issues.len(),
            compliance = %compliance_status,
            "阶段就绪评估完成"
        );

        Ok(Readiness {
            ready,
            blocking_issues,
            compliance_status,
        })
    }

    /// 检查单个强制要求的采样义务
    fn check_requirement(
        &self,
        requirement: &MonitoringRequirement,
        logs: &[MonitoringLog],
        now: NaiveDateTime,
        blocking_issues: &mut Vec<String>,
        has_critical_condition: &mut bool,
    ) {
        // SKIPPED(采集失败)不算有效数据
        let samples: Vec<&MonitoringLog> = logs
            .iter()
            .filter(|l| {
                l.requirement_id == requirement.requirement_id
                    && l.pass_fail_status != PassFailStatus::Skipped
            })
            .collect();

        if samples.is_empty() {
            blocking_issues.push(format!(
                "无监测数据: 强制要求 {} ({}) 在就绪窗口内无任何有效采样",
                requirement.parameter_name, requirement.requirement_id
            ));
            return;
        }

        if !requirement.is_critical_limit {
            return;
        }

        // 快照按 recorded_at 升序,末位即最新采样
        let latest_failed = samples
            .last()
            .map(|l| l.pass_fail_status == PassFailStatus::Fail)
            .unwrap_or(false);

        if latest_failed {
            *has_critical_condition = true;
            blocking_issues.push(format!(
                "关键限值失败: 要求 {} 最近一次采样为 FAIL",
                requirement.parameter_name
            ));
        }

        // 近期失败单独阻断: 即使更早的采样曾经合格,
        // 最近窗口内出现过 FAIL 仍不允许关闭阶段
        let recent_cutoff = now - Duration::minutes(self.recent_failure_window_minutes);
        let has_recent_failure = samples.iter().any(|l| {
            l.pass_fail_status == PassFailStatus::Fail && l.recorded_at >= recent_cutoff
        });
        if has_recent_failure {
            *has_critical_condition = true;
            blocking_issues.push(format!(
                "近期关键失败: 要求 {} 在最近 {} 分钟内存在 FAIL 采样",
                requirement.parameter_name, self.recent_failure_window_minutes
            ));
        }
    }

    /// 判定一组未解决预警中是否存在关键预警(调度/状态查询复用)
    pub fn has_open_critical_alert(alerts: &[Alert]) -> bool {
        alerts
            .iter()
            .any(|a| !a.resolved && a.severity == DeviationSeverity::Critical)
    }
}
