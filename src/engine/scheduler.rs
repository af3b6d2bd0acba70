// ==========================================
// HACCP 过程控制系统 - 监测调度器
// ==========================================
// 职责: 按 (过程, 阶段) 维度运行周期性监测
// 每周期: 到期判定 → 采集(有界超时) → 分类 → 落日志(+预警) → 汇总
// ==========================================
// 红线: 同一阶段同一时刻最多一个监测周期在执行,
//       并发第二次触发被拒绝而不是并行运行
// 红线: 单个要求的采集失败被隔离(记 SKIPPED 日志,下周期重试),
//       永不中断本周期其余要求,永不升级为过程级失败
// 红线: 调度状态持久化于 monitoring_task 注册表,重启可恢复
// ==========================================

use crate::config::MonitoringConfig;
use crate::domain::monitoring::{MonitoringLog, MonitoringRequirement, MonitoringTask};
use crate::domain::types::{
    DeviationSeverity, PassFailStatus, ProcessStatus, SamplingFrequency, TaskScheduleState,
};
use crate::engine::alert_manager::AlertManager;
use crate::engine::classifier::DeviationClassifier;
use crate::engine::collector::ParameterCollector;
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::{
    AlertRepository, MonitoringLogRepository, MonitoringRequirementRepository,
    MonitoringTaskRepository, ProcessStageRepository, ProductionProcessRepository,
};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ==========================================
// CycleResult - 监测周期执行结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub process_id: String,
    /// 本周期针对的活动阶段;过程无活动阶段时为 None(空转周期)
    pub stage_id: Option<String>,
    /// 成功落库的采样数(含 PASS/FAIL)
    pub logged: usize,
    /// 采集失败跳过的要求数(下周期重试)
    pub skipped: usize,
    /// 本周期新建的预警 ID
    pub alert_ids: Vec<String>,
    /// 本周期检出的偏差明细
    pub deviations: Vec<DeviationDetail>,
    /// 阶段是否仍处于活动状态;false 表示调度应当终止
    pub stage_active: bool,
}

/// 偏差明细
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviationDetail {
    pub requirement_id: String,
    pub parameter_name: String,
    pub measured_value: f64,
    pub severity: DeviationSeverity,
}

// ==========================================
// MonitoringStatus - 监测状态查询结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringStatus {
    pub process_id: String,
    pub process_status: ProcessStatus,
    pub active_stage_id: Option<String>,
    pub active_stage_name: Option<String>,
    pub schedule_state: TaskScheduleState,
    pub open_alert_count: i64,
    pub requirements: Vec<RequirementStatus>,
}

/// 单个监测要求的状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementStatus {
    pub requirement_id: String,
    pub parameter_name: String,
    pub is_mandatory: bool,
    pub is_critical_limit: bool,
    pub last_sampled_at: Option<NaiveDateTime>,
    pub last_value: Option<f64>,
    pub last_status: Option<PassFailStatus>,
    /// 到期判定: next_due_at <= now(统一闭区间约定)
    pub due_now: bool,
    /// 逾期判定: next_due_at 已落后超过一个采样间隔
    pub overdue: bool,
}

// ==========================================
// MonitoringScheduler - 监测调度器
// ==========================================
pub struct MonitoringScheduler {
    process_repo: Arc<ProductionProcessRepository>,
    stage_repo: Arc<ProcessStageRepository>,
    requirement_repo: Arc<MonitoringRequirementRepository>,
    log_repo: Arc<MonitoringLogRepository>,
    alert_repo: Arc<AlertRepository>,
    task_repo: Arc<MonitoringTaskRepository>,
    alert_manager: Arc<AlertManager>,
    classifier: DeviationClassifier,
    collector: Arc<dyn ParameterCollector>,
    config: MonitoringConfig,
    /// 每阶段一把周期锁: try_lock 失败即拒绝并发周期
    stage_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    /// 每过程一个 tick 循环取消发送端;丢弃即通知循环在下一个等待点退出
    tick_cancels: StdMutex<HashMap<String, watch::Sender<()>>>,
}

impl MonitoringScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        process_repo: Arc<ProductionProcessRepository>,
        stage_repo: Arc<ProcessStageRepository>,
        requirement_repo: Arc<MonitoringRequirementRepository>,
        log_repo: Arc<MonitoringLogRepository>,
        alert_repo: Arc<AlertRepository>,
        task_repo: Arc<MonitoringTaskRepository>,
        alert_manager: Arc<AlertManager>,
        collector: Arc<dyn ParameterCollector>,
        config: MonitoringConfig,
    ) -> Self {
        Self {
            process_repo,
            stage_repo,
            requirement_repo,
            log_repo,
            alert_repo,
            task_repo,
            alert_manager,
            classifier: DeviationClassifier::new(),
            collector,
            config,
            stage_locks: StdMutex::new(HashMap::new()),
            tick_cancels: StdMutex::new(HashMap::new()),
        }
    }

    // ==========================================
    // 调度生命周期
    // ==========================================

    /// 为过程当前活动阶段开启周期监测
    ///
    /// # 说明
    /// - 注册表中该过程的旧任务先置 STOPPED,再写入新阶段的 SCHEDULED 行,
    ///   保证每过程最多一个 SCHEDULED 任务
    /// - 已存在的 tick 循环收到取消信号后在下一个等待点退出
    pub fn start(self: &Arc<Self>, process_id: &str) -> EngineResult<()> {
        let period =
            Duration::from_secs((self.config.cycle_interval_minutes.max(1) as u64) * 60);
        self.start_with_period(process_id, period)
    }

    /// 以自定义 tick 周期开启调度(联调与集成验证场景;常规路径走 start)
    pub fn start_with_period(
        self: &Arc<Self>,
        process_id: &str,
        period: Duration,
    ) -> EngineResult<()> {
        let stage = self
            .stage_repo
            .find_active_stage(process_id)?
            .ok_or_else(|| EngineError::StateConflict {
                entity: format!("production_process {}", process_id),
                current: "无活动阶段".to_string(),
                required: "存在 IN_PROGRESS 阶段".to_string(),
            })?;

        self.task_repo.stop_all_for_process(process_id)?;
        self.task_repo.upsert(&MonitoringTask {
            process_id: process_id.to_string(),
            stage_id: stage.stage_id.clone(),
            state: TaskScheduleState::Scheduled,
            cycle_interval_minutes: self.config.cycle_interval_minutes,
            updated_at: chrono::Utc::now().naive_utc(),
        })?;

        self.spawn_tick_task(process_id, period);

        info!(
            process_id = %process_id,
            stage_id = %stage.stage_id,
            period_seconds = period.as_secs(),
            "监测调度已开启"
        );
        Ok(())
    }

    /// 停止过程的全部监测调度
    ///
    /// # 说明
    /// 取消只在 tick 循环的等待点生效: 执行中的周期允许完成,
    /// 结果照常持久化,之后不再调度新 tick。
    pub fn stop(&self, process_id: &str) -> EngineResult<()> {
        if let Ok(mut cancels) = self.tick_cancels.lock() {
            cancels.remove(process_id);
        }
        self.task_repo.stop_all_for_process(process_id)?;

        // 周期锁随调度一起回收;仍处于活动的阶段保留锁
        let stages = self.stage_repo.find_by_process(process_id)?;
        if let Ok(mut locks) = self.stage_locks.lock() {
            for stage in &stages {
                if !stage.is_active() {
                    locks.remove(&stage.stage_id);
                }
            }
        }

        info!(process_id = %process_id, "监测调度已停止");
        Ok(())
    }

    /// 启动恢复: 按注册表与阶段状态重建调度
    ///
    /// # 说明
    /// 取代源系统"重启即丢失"的内存任务字典:
    /// - IN_PROGRESS 过程存在活动阶段 → 重新开启调度(补建缺失注册行)
    /// - SCHEDULED 注册行对应阶段已非活动 → 置 STOPPED
    pub fn recover_registry(self: &Arc<Self>) -> EngineResult<usize> {
        let mut recovered = 0usize;

        for process in self.process_repo.list_by_status(ProcessStatus::InProgress)? {
            if self.stage_repo.find_active_stage(&process.process_id)?.is_some() {
                self.start(&process.process_id)?;
                recovered += 1;
            }
        }

        for task in self.task_repo.list_scheduled()? {
            let stage = self.stage_repo.get_by_id(&task.stage_id)?;
            if !stage.is_active() {
                self.task_repo.stop_all_for_process(&task.process_id)?;
            }
        }

        info!(recovered = recovered, "监测调度注册表恢复完成");
        Ok(recovered)
    }

    /// 生成周期 tick 任务(每过程一个)
    ///
    /// 取消协作式: 信号只在等待 tick 时被检查,
    /// 执行中的周期总是完整跑完并落库。
    fn spawn_tick_task(self: &Arc<Self>, process_id: &str, period: Duration) {
        let (cancel_tx, mut cancel_rx) = watch::channel(());
        let scheduler = Arc::clone(self);
        let task_process_id = process_id.to_string();

        tokio::spawn(async move {
            let process_id = task_process_id;
            // 首个 tick 在一个完整周期后触发,阶段激活时刻的采样由调用路径负责
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => {
                        debug!(process_id = %process_id, "监测调度已取消,tick 任务退出");
                        break;
                    }
                    _ = interval.tick() => {}
                }

                match scheduler.execute_cycle(&process_id).await {
                    Ok(result) => {
                        if !result.stage_active {
                            debug!(process_id = %process_id, "阶段已不再活动,tick 任务退出");
                            break;
                        }
                    }
                    // 与手动触发撞锁: 本 tick 被合并,下周期照常
                    Err(EngineError::ConcurrencyConflict(_)) => {
                        debug!(process_id = %process_id, "监测周期与并发触发合并,跳过本 tick");
                    }
                    Err(e) => {
                        warn!(process_id = %process_id, error = %e, "监测周期执行失败,下周期重试");
                    }
                }
            }
        });

        // 换挡: 旧发送端被替换丢弃,旧 tick 循环在下一个等待点退出
        if let Ok(mut cancels) = self.tick_cancels.lock() {
            cancels.insert(process_id.to_string(), cancel_tx);
        }
    }

    // ==========================================
    // 周期执行
    // ==========================================

    /// 执行一个监测周期(调度 tick 与手动触发共用入口)
    ///
    /// # 返回
    /// - Ok(CycleResult): 周期汇总
    /// - Err(ConcurrencyConflict): 同阶段已有周期在执行,本次被拒绝
    ///
    /// # 说明
    /// 阶段已非活动(完成/中止/回退)时为空转: 返回 stage_active=false
    /// 并同时注销该过程的调度注册行。
    pub async fn execute_cycle(&self, process_id: &str) -> EngineResult<CycleResult> {
        let process = self.process_repo.get_by_id(process_id)?;

        if process.status != ProcessStatus::InProgress {
            self.task_repo.stop_all_for_process(process_id)?;
            return Ok(Self::idle_result(process_id));
        }

        let stage = match self.stage_repo.find_active_stage(process_id)? {
            Some(stage) => stage,
            None => {
                self.task_repo.stop_all_for_process(process_id)?;
                return Ok(Self::idle_result(process_id));
            }
        };

        // 每阶段周期锁: 并发第二次触发被拒绝,避免同一时刻重复采样
        let lock = self.stage_lock(&stage.stage_id);
        let _guard = lock.try_lock().map_err(|_| {
            EngineError::ConcurrencyConflict(format!(
                "阶段 {} 已有监测周期在执行,本次触发被拒绝",
                stage.stage_id
            ))
        })?;

        let now = chrono::Utc::now().naive_utc();
        let window_start = stage
            .readiness_window_start
            .or(stage.actual_start)
            .unwrap_or(now);

        let requirements = self.requirement_repo.find_active_by_stage(&stage.stage_id)?;
        let last_samples = self.log_repo.last_sample_times(&stage.stage_id, &window_start)?;

        let mut result = CycleResult {
            process_id: process_id.to_string(),
            stage_id: Some(stage.stage_id.clone()),
            logged: 0,
            skipped: 0,
            alert_ids: Vec::new(),
            deviations: Vec::new(),
            stage_active: true,
        };

        for requirement in &requirements {
            let last = last_samples.get(&requirement.requirement_id).copied();
            if !Self::is_due(&requirement.frequency, last, now) {
                continue;
            }

            self.sample_requirement(&process.process_id, &stage.stage_id, requirement, &mut result)
                .await;
        }

        debug!(
            process_id = %process_id,
            stage_id = %stage.stage_id,
            logged = result.logged,
            skipped = result.skipped,
            alerts = result.alert_ids.len(),
            "监测周期执行完成"
        );

        Ok(result)
    }

    /// 采样单个要求: 采集 → 分类 → 落库
    ///
    /// 采集/分类失败均隔离为 SKIPPED 软失败,不中断周期
    async fn sample_requirement(
        &self,
        process_id: &str,
        stage_id: &str,
        requirement: &MonitoringRequirement,
        result: &mut CycleResult,
    ) {
        let timeout = Duration::from_secs(self.config.collector_timeout_seconds);
        let collected =
            tokio::time::timeout(timeout, self.collector.collect(requirement)).await;

        let sample = match collected {
            Ok(Ok(sample)) => sample,
            Ok(Err(e)) => {
                warn!(
                    requirement_id = %requirement.requirement_id,
                    error = %e,
                    "参数采集失败,记为跳过,下周期重试"
                );
                self.record_skipped(process_id, stage_id, requirement, result);
                return;
            }
            Err(_) => {
                warn!(
                    requirement_id = %requirement.requirement_id,
                    timeout_seconds = self.config.collector_timeout_seconds,
                    "参数采集超时,记为跳过,下周期重试"
                );
                self.record_skipped(process_id, stage_id, requirement, result);
                return;
            }
        };

        let classification = match self.classifier.classify(sample.value, requirement) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    requirement_id = %requirement.requirement_id,
                    error = %e,
                    "容差配置无法判定,记为跳过"
                );
                self.record_skipped(process_id, stage_id, requirement, result);
                return;
            }
        };

        let log = MonitoringLog {
            log_id: Uuid::new_v4().to_string(),
            requirement_id: requirement.requirement_id.clone(),
            stage_id: stage_id.to_string(),
            process_id: process_id.to_string(),
            recorded_at: chrono::Utc::now().naive_utc(),
            measured_value: Some(sample.value),
            within_limits: classification.within_limits,
            pass_fail_status: if classification.within_limits {
                PassFailStatus::Pass
            } else {
                PassFailStatus::Fail
            },
            deviation_severity: classification.severity,
            measurement_method: Some(sample.method),
            equipment_id: sample.equipment_id,
        };

        match self.alert_manager.persist_log(&log, requirement) {
            Ok(alert) => {
                result.logged += 1;
                if !classification.within_limits {
                    result.deviations.push(DeviationDetail {
                        requirement_id: requirement.requirement_id.clone(),
                        parameter_name: requirement.parameter_name.clone(),
                        measured_value: sample.value,
                        severity: classification.severity,
                    });
                }
                if let Some(alert) = alert {
                    result.alert_ids.push(alert.alert_id);
                }
            }
            Err(e) => {
                warn!(
                    requirement_id = %requirement.requirement_id,
                    error = %e,
                    "监测日志落库失败,下周期重试"
                );
                result.skipped += 1;
            }
        }
    }

    /// 记录一次跳过采样(采集失败/超时)
    fn record_skipped(
        &self,
        process_id: &str,
        stage_id: &str,
        requirement: &MonitoringRequirement,
        result: &mut CycleResult,
    ) {
        let log = MonitoringLog {
            log_id: Uuid::new_v4().to_string(),
            requirement_id: requirement.requirement_id.clone(),
            stage_id: stage_id.to_string(),
            process_id: process_id.to_string(),
            recorded_at: chrono::Utc::now().naive_utc(),
            measured_value: None,
            within_limits: true,
            pass_fail_status: PassFailStatus::Skipped,
            deviation_severity: DeviationSeverity::None,
            measurement_method: None,
            equipment_id: None,
        };

        if let Err(e) = self.alert_manager.persist_log(&log, requirement) {
            warn!(
                requirement_id = %requirement.requirement_id,
                error = %e,
                "跳过日志落库失败"
            );
        }
        result.skipped += 1;
    }

    // ==========================================
    // 到期判定
    // ==========================================

    /// 到期判定,统一闭区间约定: next_due_at <= now 即到期
    ///
    /// - CONTINUOUS: 每周期都到期
    /// - PER_BATCH: 窗口内无采样才到期
    /// - EVERY_N_MINUTES/HOURLY: 无采样立即到期,否则 last + interval <= now
    fn is_due(
        frequency: &SamplingFrequency,
        last_sample: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> bool {
        match frequency {
            SamplingFrequency::Continuous => true,
            SamplingFrequency::PerBatch => last_sample.is_none(),
            SamplingFrequency::EveryNMinutes(_) | SamplingFrequency::Hourly => {
                match (last_sample, frequency.interval_minutes()) {
                    (None, _) => true,
                    (Some(last), Some(interval)) => {
                        last + ChronoDuration::minutes(interval) <= now
                    }
                    (Some(_), None) => true,
                }
            }
        }
    }

    // ==========================================
    // 监测状态查询
    // ==========================================

    /// 查询过程的监测状态(供调用方展示)
    pub fn monitoring_status(&self, process_id: &str) -> EngineResult<MonitoringStatus> {
        let process = self.process_repo.get_by_id(process_id)?;
        let active_stage = self.stage_repo.find_active_stage(process_id)?;

        let (schedule_state, open_alert_count, requirements) = match &active_stage {
            Some(stage) => {
                let task = self.task_repo.find(process_id, &stage.stage_id)?;
                let state = task
                    .map(|t| t.state)
                    .unwrap_or(TaskScheduleState::Stopped);

                let open = self.alert_repo.count_open_by_stage(&stage.stage_id)?;

                let now = chrono::Utc::now().naive_utc();
                let last_logs = self.log_repo.last_logs_by_requirement(&stage.stage_id)?;
                let reqs = self
                    .requirement_repo
                    .find_active_by_stage(&stage.stage_id)?
                    .into_iter()
                    .map(|r| {
                        let last = last_logs.get(&r.requirement_id);
                        let last_at = last.map(|l| l.recorded_at);
                        let due_now = Self::is_due(&r.frequency, last_at, now);
                        // 逾期: 距上次采样已超过两个间隔(一个间隔的宽限)
                        let overdue = match (last_at, r.frequency.interval_minutes()) {
                            (Some(at), Some(interval)) => {
                                at + ChronoDuration::minutes(interval * 2) < now
                            }
                            _ => false,
                        };
                        RequirementStatus {
                            requirement_id: r.requirement_id.clone(),
                            parameter_name: r.parameter_name.clone(),
                            is_mandatory: r.is_mandatory,
                            is_critical_limit: r.is_critical_limit,
                            last_sampled_at: last_at,
                            last_value: last.and_then(|l| l.measured_value),
                            last_status: last.map(|l| l.pass_fail_status),
                            due_now,
                            overdue,
                        }
                    })
                    .collect();

                (state, open, reqs)
            }
            None => (TaskScheduleState::Stopped, 0, Vec::new()),
        };

        Ok(MonitoringStatus {
            process_id: process.process_id,
            process_status: process.status,
            active_stage_id: active_stage.as_ref().map(|s| s.stage_id.clone()),
            active_stage_name: active_stage.as_ref().map(|s| s.name.clone()),
            schedule_state,
            open_alert_count,
            requirements,
        })
    }

    fn stage_lock(&self, stage_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .stage_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(stage_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn idle_result(process_id: &str) -> CycleResult {
        CycleResult {
            process_id: process_id.to_string(),
            stage_id: None,
            logged: 0,
            skipped: 0,
            alert_ids: Vec::new(),
            deviations: Vec::new(),
            stage_active: false,
        }
    }
}

// ==========================================
// 单元测试
// ==========================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::process::{ProcessStage, ProductionProcess};
    use crate::domain::types::StageStatus;
    use crate::engine::collector::CollectedSample;
    use crate::engine::events::OptionalNotificationPublisher;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_continuous_always_due() {
        assert!(MonitoringScheduler::is_due(
            &SamplingFrequency::Continuous,
            Some(ts(10, 0)),
            ts(10, 0)
        ));
    }

    #[test]
    fn test_per_batch_due_only_without_sample() {
        assert!(MonitoringScheduler::is_due(
            &SamplingFrequency::PerBatch,
            None,
            ts(10, 0)
        ));
        assert!(!MonitoringScheduler::is_due(
            &SamplingFrequency::PerBatch,
            Some(ts(9, 0)),
            ts(10, 0)
        ));
    }

    #[test]
    fn test_interval_due_boundary_is_inclusive() {
        // 统一约定: next_due_at <= now 即到期
        let freq = SamplingFrequency::EveryNMinutes(30);
        assert!(MonitoringScheduler::is_due(&freq, Some(ts(9, 30)), ts(10, 0)));
        assert!(!MonitoringScheduler::is_due(&freq, Some(ts(9, 31)), ts(10, 0)));
    }

    #[test]
    fn test_hourly_due_after_an_hour() {
        assert!(MonitoringScheduler::is_due(
            &SamplingFrequency::Hourly,
            Some(ts(9, 0)),
            ts(10, 0)
        ));
        assert!(!MonitoringScheduler::is_due(
            &SamplingFrequency::Hourly,
            Some(ts(9, 30)),
            ts(10, 0)
        ));
    }

    #[test]
    fn test_no_sample_is_immediately_due() {
        assert!(MonitoringScheduler::is_due(
            &SamplingFrequency::EveryNMinutes(30),
            None,
            ts(10, 0)
        ));
    }

    // ==========================================
    // 调度状态回收
    // ==========================================

    struct FixedCollector;

    #[async_trait::async_trait]
    impl ParameterCollector for FixedCollector {
        async fn collect(
            &self,
            _requirement: &MonitoringRequirement,
        ) -> Result<CollectedSample, Box<dyn std::error::Error + Send + Sync>> {
            Ok(CollectedSample {
                value: 72.0,
                method: "SENSOR".to_string(),
                equipment_id: None,
            })
        }
    }

    fn build_scheduler() -> (
        tempfile::NamedTempFile,
        Arc<MonitoringScheduler>,
        Arc<ProductionProcessRepository>,
        Arc<ProcessStageRepository>,
    ) {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let db_path = temp.path().to_str().unwrap().to_string();
        let conn = crate::db::open_sqlite_connection(&db_path).unwrap();
        crate::db::init_schema(&conn).unwrap();
        let conn = Arc::new(StdMutex::new(conn));

        let process_repo = Arc::new(ProductionProcessRepository::from_connection(conn.clone()));
        let stage_repo = Arc::new(ProcessStageRepository::from_connection(conn.clone()));
        let requirement_repo =
            Arc::new(MonitoringRequirementRepository::from_connection(conn.clone()));
        let log_repo = Arc::new(MonitoringLogRepository::from_connection(conn.clone()));
        let alert_repo = Arc::new(AlertRepository::from_connection(conn.clone()));
        let task_repo = Arc::new(MonitoringTaskRepository::from_connection(conn));

        let alert_manager = Arc::new(AlertManager::new(
            log_repo.clone(),
            alert_repo.clone(),
            OptionalNotificationPublisher::none(),
        ));
        let scheduler = Arc::new(MonitoringScheduler::new(
            process_repo.clone(),
            stage_repo.clone(),
            requirement_repo,
            log_repo,
            alert_repo,
            task_repo,
            alert_manager,
            Arc::new(FixedCollector),
            MonitoringConfig::default(),
        ));
        (temp, scheduler, process_repo, stage_repo)
    }

    #[tokio::test]
    async fn test_stop_evicts_stage_locks_and_cancel_senders() {
        let (_temp, scheduler, process_repo, stage_repo) = build_scheduler();

        let process = ProductionProcess::new_draft(
            "杀菌批次".to_string(),
            "BATCH-UT-001".to_string(),
            "质检员A".to_string(),
        );
        let process_id = process.process_id.clone();
        process_repo.insert(&process).unwrap();

        let stage =
            ProcessStage::new_pending(process_id.clone(), "杀菌".to_string(), 1, true, false);
        let stage_id = stage.stage_id.clone();
        stage_repo.batch_insert(&[stage]).unwrap();

        let now = chrono::Utc::now().naive_utc();
        process_repo
            .update_status(&process_id, ProcessStatus::InProgress, Some(now), None)
            .unwrap();
        stage_repo
            .update_status(&stage_id, StageStatus::InProgress, Some(now), None, Some(now))
            .unwrap();

        scheduler.start(&process_id).unwrap();
        scheduler.execute_cycle(&process_id).await.unwrap();
        assert!(!scheduler.stage_locks.lock().unwrap().is_empty());
        assert!(!scheduler.tick_cancels.lock().unwrap().is_empty());

        // 阶段关闭后停止调度,周期锁与取消发送端一并回收
        stage_repo
            .update_status(&stage_id, StageStatus::Completed, None, Some(now), None)
            .unwrap();
        scheduler.stop(&process_id).unwrap();

        assert!(scheduler.stage_locks.lock().unwrap().is_empty());
        assert!(scheduler.tick_cancels.lock().unwrap().is_empty());
    }
}
