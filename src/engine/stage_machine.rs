// ==========================================
// HACCP 过程控制系统 - 阶段状态机
// ==========================================
// 职责: 持有过程/阶段状态,校验并应用五类阶段转换
// 过程: DRAFT → IN_PROGRESS → COMPLETED / ABORTED
// 阶段: PENDING → IN_PROGRESS → {COMPLETED, SKIPPED, ROLLED_BACK, REWORK}
// ==========================================
// 红线: 阶段状态单写者,只在本状态机的每过程锁内变更
// 红线: 同一过程的转换请求串行化,并发第二个请求快速失败
// 红线: NORMAL 转换唯一受就绪门控,EMERGENCY 绕过但必须留痕
// ==========================================

use crate::domain::process::{ProcessStage, ProductionProcess};
use crate::domain::transition::TransitionRecord;
use crate::domain::types::{ProcessStatus, StageStatus, TransitionType};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{NotificationEvent, OptionalNotificationPublisher};
use crate::engine::readiness::{Readiness, ReadinessEvaluator};
use crate::engine::scheduler::MonitoringScheduler;
use crate::repository::{
    ProcessStageRepository, ProductionProcessRepository, TransitionRecordRepository,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

// ==========================================
// TransitionRequest - 转换请求载荷
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub requested_by: String,
    /// ROLLBACK 必填;其余类型可选说明
    pub reason: Option<String>,
    /// SKIP 必须为 true(外部审批标志)
    pub prerequisites_met: bool,
    /// ROLLBACK 的目标早前阶段
    pub target_stage_id: Option<String>,
}

impl TransitionRequest {
    pub fn by(requested_by: &str) -> Self {
        Self {
            requested_by: requested_by.to_string(),
            reason: None,
            prerequisites_met: false,
            target_stage_id: None,
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_prerequisites_met(mut self) -> Self {
        self.prerequisites_met = true;
        self
    }

    pub fn with_target_stage(mut self, stage_id: &str) -> Self {
        self.target_stage_id = Some(stage_id.to_string());
        self
    }
}

// ==========================================
// TransitionResult - 转换结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResult {
    pub process_id: String,
    pub transition_type: TransitionType,
    /// 被关闭/转出的阶段
    pub from_stage_id: String,
    /// 新激活的阶段(过程完成时为 None)
    pub activated_stage_id: Option<String>,
    pub process_completed: bool,
    pub bypassed_checks: bool,
    /// 审计记录 ID
    pub record_id: String,
    /// NORMAL 转换附带的就绪评估结果
    pub readiness: Option<Readiness>,
}

// ==========================================
// ProcessStageMachine - 阶段状态机
// ==========================================
pub struct ProcessStageMachine {
    process_repo: Arc<ProductionProcessRepository>,
    stage_repo: Arc<ProcessStageRepository>,
    transition_repo: Arc<TransitionRecordRepository>,
    readiness: Arc<ReadinessEvaluator>,
    scheduler: Arc<MonitoringScheduler>,
    publisher: OptionalNotificationPublisher,
    /// 每过程一把转换锁: try_lock 失败即并发冲突
    process_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ProcessStageMachine {
    pub fn new(
        process_repo: Arc<ProductionProcessRepository>,
        stage_repo: Arc<ProcessStageRepository>,
        transition_repo: Arc<TransitionRecordRepository>,
        readiness: Arc<ReadinessEvaluator>,
        scheduler: Arc<MonitoringScheduler>,
        publisher: OptionalNotificationPublisher,
    ) -> Self {
        Self {
            process_repo,
            stage_repo,
            transition_repo,
            readiness,
            scheduler,
            publisher,
            process_locks: StdMutex::new(HashMap::new()),
        }
    }

    // ==========================================
    // 过程生命周期
    // ==========================================

    /// 启动过程: DRAFT → IN_PROGRESS,激活阶段 1,开启监测调度
    ///
    /// # 错误
    /// - StateConflict: 过程不是 DRAFT
    /// - Validation: 阶段序列为空或 sequence_order 不是连续 1..N
    /// - ConcurrencyConflict: 同过程另一操作执行中
    pub async fn start_process(
        &self,
        process_id: &str,
        requested_by: &str,
    ) -> EngineResult<ProductionProcess> {
        let lock = self.process_lock(process_id);
        let _guard = lock.try_lock().map_err(|_| {
            EngineError::ConcurrencyConflict(format!(
                "过程 {} 已有转换操作执行中,本次请求被拒绝",
                process_id
            ))
        })?;

        let process = self.process_repo.get_by_id(process_id)?;
        if process.status != ProcessStatus::Draft {
            return Err(EngineError::StateConflict {
                entity: format!("production_process {}", process_id),
                current: process.status.to_string(),
                required: ProcessStatus::Draft.to_string(),
            });
        }

        let stages = self.stage_repo.find_by_process(process_id)?;
        Self::validate_sequence(&stages)?;

        let now = chrono::Utc::now().naive_utc();
        self.process_repo
            .update_status(process_id, ProcessStatus::InProgress, Some(now), None)?;
        self.activate_stage(&stages[0], now)?;

        self.scheduler.start(process_id)?;

        info!(
            process_id = %process_id,
            first_stage = %stages[0].stage_id,
            requested_by = %requested_by,
            "过程已启动,阶段 1 激活"
        );

        self.process_repo.get_by_id(process_id).map_err(Into::into)
    }

    /// 中止过程: IN_PROGRESS → ABORTED,停止监测
    ///
    /// 活动阶段转出 IN_PROGRESS(置 ROLLED_BACK),
    /// 维持"终态过程无活动阶段"不变式
    pub async fn abort_process(
        &self,
        process_id: &str,
        requested_by: &str,
        reason: &str,
    ) -> EngineResult<ProductionProcess> {
        if reason.trim().is_empty() {
            return Err(EngineError::Validation(
                "中止过程必须提供理由".to_string(),
            ));
        }

        let lock = self.process_lock(process_id);
        let _guard = lock.try_lock().map_err(|_| {
            EngineError::ConcurrencyConflict(format!(
                "过程 {} 已有转换操作执行中,本次请求被拒绝",
                process_id
            ))
        })?;

        let process = self.process_repo.get_by_id(process_id)?;
        if process.status != ProcessStatus::InProgress {
            return Err(EngineError::StateConflict {
                entity: format!("production_process {}", process_id),
                current: process.status.to_string(),
                required: ProcessStatus::InProgress.to_string(),
            });
        }

        let now = chrono::Utc::now().naive_utc();
        if let Some(stage) = self.stage_repo.find_active_stage(process_id)? {
            self.stage_repo.update_status(
                &stage.stage_id,
                StageStatus::RolledBack,
                None,
                Some(now),
                None,
            )?;
        }
        self.process_repo
            .update_status(process_id, ProcessStatus::Aborted, None, Some(now))?;

        // 阶段先转出 IN_PROGRESS 再停调度,调度侧得以回收全部周期锁
        self.scheduler.stop(process_id)?;

        warn!(
            process_id = %process_id,
            requested_by = %requested_by,
            reason = %reason,
            "过程已中止"
        );

        // 过程已进入终态,回收转换锁;后续请求在状态校验处被拒
        drop(_guard);
        self.release_process_lock(process_id);

        self.process_repo.get_by_id(process_id).map_err(Into::into)
    }

    // ==========================================
    // 阶段转换
    // ==========================================

    /// 请求一次阶段转换
    ///
    /// # 参数
    /// - process_id / stage_id: stage_id 必须是过程当前 IN_PROGRESS 阶段
    /// - transition_type: 五类转换之一
    /// - request: 请求载荷(请求人、理由、审批标志、回退目标)
    ///
    /// # 错误
    /// - ReadinessNotMet: NORMAL 转换且存在阻断问题(携带问题列表)
    /// - Validation: ROLLBACK 缺理由/目标,SKIP 缺审批标志
    /// - StateConflict / ConcurrencyConflict / NotFound
    pub async fn request_transition(
        &self,
        process_id: &str,
        stage_id: &str,
        transition_type: TransitionType,
        request: TransitionRequest,
    ) -> EngineResult<TransitionResult> {
        let lock = self.process_lock(process_id);
        let _guard = lock.try_lock().map_err(|_| {
            EngineError::ConcurrencyConflict(format!(
                "过程 {} 已有转换操作执行中,本次请求被拒绝",
                process_id
            ))
        })?;

        let process = self.process_repo.get_by_id(process_id)?;
        if process.status != ProcessStatus::InProgress {
            return Err(EngineError::StateConflict {
                entity: format!("production_process {}", process_id),
                current: process.status.to_string(),
                required: ProcessStatus::InProgress.to_string(),
            });
        }

        let stage = self.stage_repo.get_by_id(stage_id)?;
        if stage.process_id != process_id {
            return Err(EngineError::Validation(format!(
                "阶段 {} 不属于过程 {}",
                stage_id, process_id
            )));
        }
        if stage.status != StageStatus::InProgress {
            return Err(EngineError::StateConflict {
                entity: format!("process_stage {}", stage_id),
                current: stage.status.to_string(),
                required: StageStatus::InProgress.to_string(),
            });
        }

        let result = match transition_type {
            TransitionType::Normal => self.apply_normal(&process, &stage, &request).await,
            TransitionType::Rollback => self.apply_rollback(&process, &stage, &request).await,
            TransitionType::Skip => self.apply_skip(&process, &stage, &request).await,
            TransitionType::Emergency => self.apply_emergency(&process, &stage, &request).await,
            TransitionType::Rework => self.apply_rework(&process, &stage, &request).await,
        }?;

        self.publisher.publish(NotificationEvent::TransitionApplied {
            process_id: process_id.to_string(),
            stage_id: stage_id.to_string(),
            transition_type,
            bypassed_checks: result.bypassed_checks,
        });

        // 最后阶段关闭即过程终态,转换锁随之回收
        if result.process_completed {
            drop(_guard);
            self.release_process_lock(process_id);
        }

        Ok(result)
    }

    /// NORMAL: 就绪门控通过后关闭阶段并推进
    async fn apply_normal(
        &self,
        process: &ProductionProcess,
        stage: &ProcessStage,
        request: &TransitionRequest,
    ) -> EngineResult<TransitionResult> {
        let readiness = self.readiness.evaluate_stage_completion(&stage.stage_id)?;

        if !readiness.ready {
            self.publisher.publish(NotificationEvent::TransitionBlocked {
                process_id: process.process_id.clone(),
                stage_id: stage.stage_id.clone(),
                blocking_issues: readiness.blocking_issues.clone(),
            });
            return Err(EngineError::ReadinessNotMet {
                blocking_issues: readiness.blocking_issues,
            });
        }

        let mut result = self
            .complete_and_advance(process, stage, StageStatus::Completed, request, false)
            .await?;
        result.transition_type = TransitionType::Normal;
        result.readiness = Some(readiness);
        Ok(result)
    }

    /// ROLLBACK: 绕过门控,当前阶段回退,重新激活指定早前阶段
    ///
    /// 目标与当前之间已完成/跳过的阶段重置为 PENDING,
    /// 使前向推进重新经过它们;目标阶段保留原就绪窗口(既有日志继续有效)
    async fn apply_rollback(
        &self,
        process: &ProductionProcess,
        stage: &ProcessStage,
        request: &TransitionRequest,
    ) -> EngineResult<TransitionResult> {
        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                EngineError::Validation("ROLLBACK 转换必须提供非空理由".to_string())
            })?;

        let target_stage_id = request.target_stage_id.as_deref().ok_or_else(|| {
            EngineError::Validation("ROLLBACK 转换必须指定目标早前阶段".to_string())
        })?;

        let target = self.stage_repo.get_by_id(target_stage_id)?;
        if target.process_id != process.process_id {
            return Err(EngineError::Validation(format!(
                "回退目标阶段 {} 不属于过程 {}",
                target_stage_id, process.process_id
            )));
        }
        if target.sequence_order >= stage.sequence_order {
            return Err(EngineError::Validation(format!(
                "回退目标必须是早前阶段: 目标序号 {} >= 当前序号 {}",
                target.sequence_order, stage.sequence_order
            )));
        }

        let now = chrono::Utc::now().naive_utc();

        self.stage_repo.update_status(
            &stage.stage_id,
            StageStatus::RolledBack,
            None,
            Some(now),
            None,
        )?;

        // 中间阶段重置为 PENDING,前向推进重新经过
        for mid in self.stage_repo.find_by_process(&process.process_id)? {
            if mid.sequence_order > target.sequence_order
                && mid.sequence_order < stage.sequence_order
                && mid.status.satisfies_predecessor()
            {
                self.stage_repo.update_status(
                    &mid.stage_id,
                    StageStatus::Pending,
                    None,
                    None,
                    None,
                )?;
            }
        }

        // 目标阶段重新激活: 保留原就绪窗口,既有日志继续计入评估
        self.stage_repo.update_status(
            &target.stage_id,
            StageStatus::InProgress,
            None,
            None,
            None,
        )?;

        self.scheduler.start(&process.process_id)?;

        let record = TransitionRecord::new(
            &process.process_id,
            &stage.stage_id,
            TransitionType::Rollback,
            &request.requested_by,
            Some(reason.to_string()),
            false,
            Some(target.stage_id.clone()),
        );
        self.transition_repo.insert(&record)?;

        info!(
            process_id = %process.process_id,
            from_stage = %stage.stage_id,
            target_stage = %target.stage_id,
            reason = %reason,
            "阶段已回退"
        );

        Ok(TransitionResult {
            process_id: process.process_id.clone(),
            transition_type: TransitionType::Rollback,
            from_stage_id: stage.stage_id.clone(),
            activated_stage_id: Some(target.stage_id.clone()),
            process_completed: false,
            bypassed_checks: false,
            record_id: record.record_id,
            readiness: None,
        })
    }

    /// SKIP: 需 prerequisites_met 审批标志,不评估就绪,直接跳过并推进
    ///
    /// 跳过 CCP 阶段由调用方策略层把关,状态机本身不拒绝
    async fn apply_skip(
        &self,
        process: &ProductionProcess,
        stage: &ProcessStage,
        request: &TransitionRequest,
    ) -> EngineResult<TransitionResult> {
        if !request.prerequisites_met {
            return Err(EngineError::Validation(
                "SKIP 转换必须携带 prerequisites_met=true 审批标志".to_string(),
            ));
        }

        if stage.is_critical_control_point {
            warn!(
                process_id = %process.process_id,
                stage_id = %stage.stage_id,
                "跳过 CCP 阶段: 策略把关由调用方负责"
            );
        }

        let mut result = self
            .complete_and_advance(process, stage, StageStatus::Skipped, request, false)
            .await?;
        result.transition_type = TransitionType::Skip;
        Ok(result)
    }

    /// EMERGENCY: 无条件绕过就绪评估,完成并推进,审计记录 bypassed_checks=true
    async fn apply_emergency(
        &self,
        process: &ProductionProcess,
        stage: &ProcessStage,
        request: &TransitionRequest,
    ) -> EngineResult<TransitionResult> {
        warn!(
            process_id = %process.process_id,
            stage_id = %stage.stage_id,
            requested_by = %request.requested_by,
            "EMERGENCY 转换: 绕过就绪评估"
        );

        let mut result = self
            .complete_and_advance(process, stage, StageStatus::Completed, request, true)
            .await?;
        result.transition_type = TransitionType::Emergency;
        Ok(result)
    }

    /// REWORK: 阶段回到 REWORK 后立即重新进入 IN_PROGRESS,
    /// 重置就绪评估窗口(此前的失败日志不再阻断),重启调度
    async fn apply_rework(
        &self,
        process: &ProductionProcess,
        stage: &ProcessStage,
        request: &TransitionRequest,
    ) -> EngineResult<TransitionResult> {
        let now = chrono::Utc::now().naive_utc();

        // REWORK 是瞬时状态: 落一次以留痕,随即回到 IN_PROGRESS
        self.stage_repo
            .update_status(&stage.stage_id, StageStatus::Rework, None, None, None)?;
        self.stage_repo.update_status(
            &stage.stage_id,
            StageStatus::InProgress,
            None,
            None,
            Some(now),
        )?;

        self.scheduler.start(&process.process_id)?;

        let record = TransitionRecord::new(
            &process.process_id,
            &stage.stage_id,
            TransitionType::Rework,
            &request.requested_by,
            request.reason.clone(),
            false,
            None,
        );
        self.transition_repo.insert(&record)?;

        info!(
            process_id = %process.process_id,
            stage_id = %stage.stage_id,
            "阶段进入返工,就绪窗口已重置"
        );

        Ok(TransitionResult {
            process_id: process.process_id.clone(),
            transition_type: TransitionType::Rework,
            from_stage_id: stage.stage_id.clone(),
            activated_stage_id: Some(stage.stage_id.clone()),
            process_completed: false,
            bypassed_checks: false,
            record_id: record.record_id,
            readiness: None,
        })
    }

    // ==========================================
    // 推进与激活
    // ==========================================

    /// 关闭当前阶段并推进: 激活下一待执行阶段,或完成过程
    async fn complete_and_advance(
        &self,
        process: &ProductionProcess,
        stage: &ProcessStage,
        closing_status: StageStatus,
        request: &TransitionRequest,
        bypassed_checks: bool,
    ) -> EngineResult<TransitionResult> {
        let now = chrono::Utc::now().naive_utc();

        self.stage_repo
            .update_status(&stage.stage_id, closing_status, None, Some(now), None)?;

        // 下一阶段: 序号更大的首个 PENDING 或曾被回退的阶段
        let next = self
            .stage_repo
            .find_by_process(&process.process_id)?
            .into_iter()
            .find(|s| {
                s.sequence_order > stage.sequence_order
                    && matches!(s.status, StageStatus::Pending | StageStatus::RolledBack)
            });

        let (activated_stage_id, process_completed) = match next {
            Some(next_stage) => {
                self.activate_stage(&next_stage, now)?;
                self.scheduler.start(&process.process_id)?;
                (Some(next_stage.stage_id), false)
            }
            None => {
                self.scheduler.stop(&process.process_id)?;
                self.process_repo.update_status(
                    &process.process_id,
                    ProcessStatus::Completed,
                    None,
                    Some(now),
                )?;
                self.publisher.publish(NotificationEvent::ProcessCompleted {
                    process_id: process.process_id.clone(),
                    completed_at: now,
                });
                info!(process_id = %process.process_id, "最后阶段关闭,过程已完成");
                (None, true)
            }
        };

        let transition_type = match closing_status {
            StageStatus::Skipped => TransitionType::Skip,
            _ if bypassed_checks => TransitionType::Emergency,
            _ => TransitionType::Normal,
        };
        let record = TransitionRecord::new(
            &process.process_id,
            &stage.stage_id,
            transition_type,
            &request.requested_by,
            request.reason.clone(),
            bypassed_checks,
            None,
        );
        self.transition_repo.insert(&record)?;

        Ok(TransitionResult {
            process_id: process.process_id.clone(),
            transition_type,
            from_stage_id: stage.stage_id.clone(),
            activated_stage_id,
            process_completed,
            bypassed_checks,
            record_id: record.record_id,
            readiness: None,
        })
    }

    /// 激活阶段: 校验前序约束后进入 IN_PROGRESS,开启新的就绪窗口
    fn activate_stage(&self, stage: &ProcessStage, now: NaiveDateTime) -> EngineResult<()> {
        // 前序约束: 非首阶段要求前序 COMPLETED 或 SKIPPED
        if stage.sequence_order > 1 {
            let stages = self.stage_repo.find_by_process(&stage.process_id)?;
            let predecessor = stages
                .iter()
                .find(|s| s.sequence_order == stage.sequence_order - 1)
                .ok_or_else(|| {
                    EngineError::Validation(format!(
                        "阶段序列不连续: 序号 {} 缺少前序阶段",
                        stage.sequence_order
                    ))
                })?;
            if !predecessor.status.satisfies_predecessor() {
                return Err(EngineError::StateConflict {
                    entity: format!("process_stage {}", predecessor.stage_id),
                    current: predecessor.status.to_string(),
                    required: "COMPLETED 或 SKIPPED".to_string(),
                });
            }
        }

        self.stage_repo.update_status(
            &stage.stage_id,
            StageStatus::InProgress,
            Some(now),
            None,
            Some(now),
        )?;
        Ok(())
    }

    /// 校验 sequence_order 为连续 1..N
    fn validate_sequence(stages: &[ProcessStage]) -> EngineResult<()> {
        if stages.is_empty() {
            return Err(EngineError::Validation(
                "过程不包含任何阶段,无法启动".to_string(),
            ));
        }
        for (i, stage) in stages.iter().enumerate() {
            let expected = (i + 1) as i32;
            if stage.sequence_order != expected {
                return Err(EngineError::Validation(format!(
                    "阶段序号必须从 1 连续编号: 第 {} 个阶段序号为 {}",
                    i + 1,
                    stage.sequence_order
                )));
            }
        }
        Ok(())
    }

    fn process_lock(&self, process_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .process_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(process_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// 过程进入终态后回收其转换锁表项
    fn release_process_lock(&self, process_id: &str) {
        let mut locks = self
            .process_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(process_id);
    }
}
