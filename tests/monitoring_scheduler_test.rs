// ==========================================
// 监测调度器集成测试
// ==========================================
// 职责: 验证周期采样、软失败隔离、到期节奏、
//       并发周期合并与注册表恢复
// ==========================================


#[cfg(test)]
mod monitoring_scheduler_test {
    use chrono::NaiveDate;
    use haccp_process_control::api::ApiError;
    use haccp_process_control::domain::types::{
        DeviationSeverity, PassFailStatus, SamplingFrequency, TaskScheduleState,
    };
    use std::time::Duration;

    use crate::test_helpers::{
        pasteurize_process_templates, setup_test_env, TestEnv,
    };

    /// 创建并启动过程,返回 (process_id, 阶段 ID 列表)
    async fn start_process(env: &TestEnv, frequency: SamplingFrequency) -> (String, Vec<String>) {
        let process_id = env
            .process_api
            .create_process(
                "巴氏杀菌-批次B",
                "BATCH-2026-002",
                "质检员A",
                &pasteurize_process_templates(frequency),
            )
            .unwrap();
        env.process_api
            .start_process(&process_id, "质检员A")
            .await
            .unwrap();
        let (_, stages) = env.process_api.get_process(&process_id).unwrap();
        (process_id, stages.iter().map(|s| s.stage_id.clone()).collect())
    }

    fn epoch() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    // ==========================================
    // 周期采样
    // ==========================================

    #[tokio::test]
    async fn test_cycle_records_pass_sample() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_process(&env, SamplingFrequency::Continuous).await;

        env.collector.set_value("杀菌温度", 72.0);
        let result = env.monitoring_api.execute_cycle(&process_id).await.unwrap();

        assert_eq!(result.stage_id.as_deref(), Some(&stage_ids[0][..]));
        assert_eq!(result.logged, 1);
        assert_eq!(result.skipped, 0);
        assert!(result.alert_ids.is_empty());
        assert!(result.deviations.is_empty());
        assert!(result.stage_active);

        let logs = env
            .log_repo
            .find_by_stage_since(&stage_ids[0], &epoch())
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].measured_value, Some(72.0));
        assert!(logs[0].within_limits);
        assert_eq!(logs[0].pass_fail_status, PassFailStatus::Pass);
        assert_eq!(logs[0].measurement_method.as_deref(), Some("FAKE_SENSOR"));
        assert_eq!(logs[0].equipment_id.as_deref(), Some("EQ-TEST-001"));
    }

    #[tokio::test]
    async fn test_cycle_out_of_limits_raises_alert() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_process(&env, SamplingFrequency::Continuous).await;

        // 80℃ 超出 [70, 75]: 偏差 150% → CRITICAL
        env.collector.set_value("杀菌温度", 80.0);
        let result = env.monitoring_api.execute_cycle(&process_id).await.unwrap();

        assert_eq!(result.logged, 1);
        assert_eq!(result.alert_ids.len(), 1);
        assert_eq!(result.deviations.len(), 1);
        assert_eq!(result.deviations[0].severity, DeviationSeverity::Critical);
        assert_eq!(result.deviations[0].measured_value, 80.0);

        // 超限日志与预警同事务创建,且预警指向触发日志
        let logs = env
            .log_repo
            .find_by_stage_since(&stage_ids[0], &epoch())
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].pass_fail_status, PassFailStatus::Fail);
        assert!(!logs[0].within_limits);

        let alerts = env
            .monitoring_api
            .list_open_alerts(&process_id, None)
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_id, result.alert_ids[0]);
        assert_eq!(alerts[0].log_id, logs[0].log_id);
        assert_eq!(alerts[0].severity, DeviationSeverity::Critical);
        assert!(alerts[0].requires_immediate_action);
        assert!(!alerts[0].resolved);
    }

    #[tokio::test]
    async fn test_collector_failure_soft_skips() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_process(&env, SamplingFrequency::Continuous).await;

        env.collector.set_failing("杀菌温度");
        let result = env.monitoring_api.execute_cycle(&process_id).await.unwrap();

        assert_eq!(result.logged, 0);
        assert_eq!(result.skipped, 1);
        assert!(result.alert_ids.is_empty());
        assert!(result.stage_active);

        // SKIPPED 日志留痕且无实测值
        let logs = env
            .log_repo
            .find_by_stage_since(&stage_ids[0], &epoch())
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].pass_fail_status, PassFailStatus::Skipped);
        assert!(logs[0].measured_value.is_none());

        let status = env
            .monitoring_api
            .get_monitoring_status(&process_id)
            .unwrap();
        assert_eq!(status.requirements.len(), 1);
        assert_eq!(status.requirements[0].last_status, Some(PassFailStatus::Skipped));
    }

    #[tokio::test]
    async fn test_collector_timeout_soft_skips() {
        let env = setup_test_env();
        let (process_id, _) = start_process(&env, SamplingFrequency::Continuous).await;

        // 采集延迟超过 2 秒超时上限
        env.collector.set_value("杀菌温度", 72.0);
        env.collector.set_delay(Duration::from_secs(3));
        let result = env.monitoring_api.execute_cycle(&process_id).await.unwrap();

        assert_eq!(result.logged, 0);
        assert_eq!(result.skipped, 1);
    }

    // ==========================================
    // 到期节奏
    // ==========================================

    #[tokio::test]
    async fn test_interval_frequency_not_resampled_within_interval() {
        let env = setup_test_env();
        let (process_id, _) =
            start_process(&env, SamplingFrequency::EveryNMinutes(30)).await;

        env.collector.set_value("杀菌温度", 72.0);
        let first = env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        assert_eq!(first.logged, 1);

        // 间隔未到,立即再触发一次不重复采样
        let second = env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        assert_eq!(second.logged, 0);
        assert_eq!(second.skipped, 0);

        let status = env
            .monitoring_api
            .get_monitoring_status(&process_id)
            .unwrap();
        assert!(!status.requirements[0].due_now);
        assert!(!status.requirements[0].overdue);
        assert_eq!(status.requirements[0].last_value, Some(72.0));
    }

    #[tokio::test]
    async fn test_per_batch_sampled_once() {
        let env = setup_test_env();
        let (process_id, _) = start_process(&env, SamplingFrequency::PerBatch).await;

        env.collector.set_value("杀菌温度", 72.0);
        let first = env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        assert_eq!(first.logged, 1);

        let second = env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        assert_eq!(second.logged, 0);
    }

    #[tokio::test]
    async fn test_skipped_sample_paces_retry_to_next_cycle() {
        let env = setup_test_env();
        let (process_id, _) =
            start_process(&env, SamplingFrequency::EveryNMinutes(30)).await;

        env.collector.set_failing("杀菌温度");
        let first = env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        assert_eq!(first.skipped, 1);

        // 软失败按同样节奏重试,不在同一间隔内立刻重采
        env.collector.clear_failing("杀菌温度");
        env.collector.set_value("杀菌温度", 72.0);
        let second = env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        assert_eq!(second.logged, 0);
        assert_eq!(second.skipped, 0);
    }

    // ==========================================
    // 空转与并发
    // ==========================================

    #[tokio::test]
    async fn test_cycle_idle_for_draft_process() {
        let env = setup_test_env();
        let process_id = env
            .process_api
            .create_process(
                "未启动过程",
                "BATCH-2026-003",
                "质检员A",
                &pasteurize_process_templates(SamplingFrequency::Continuous),
            )
            .unwrap();

        let result = env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        assert!(!result.stage_active);
        assert!(result.stage_id.is_none());
        assert_eq!(result.logged, 0);
    }

    #[tokio::test]
    async fn test_cycle_idle_after_abort_stops_registry() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_process(&env, SamplingFrequency::Continuous).await;

        env.process_api
            .abort_process(&process_id, "质检员A", "设备停机")
            .await
            .unwrap();

        let result = env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        assert!(!result.stage_active);

        let task = env
            .task_repo
            .find(&process_id, &stage_ids[0])
            .unwrap()
            .unwrap();
        assert_eq!(task.state, TaskScheduleState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cycles_coalesced() {
        let env = setup_test_env();
        let (process_id, stage_ids) =
            start_process(&env, SamplingFrequency::EveryNMinutes(30)).await;

        env.collector.set_value("杀菌温度", 72.0);
        env.collector.set_delay(Duration::from_millis(300));

        let api1 = env.monitoring_api.clone();
        let api2 = env.monitoring_api.clone();
        let (pid1, pid2) = (process_id.clone(), process_id.clone());

        let t1 = tokio::spawn(async move { api1.execute_cycle(&pid1).await });
        let t2 = tokio::spawn(async move { api2.execute_cycle(&pid2).await });
        let r1 = t1.await.unwrap();
        let r2 = t2.await.unwrap();

        // 至少一个成功;撞锁的一方被合并拒绝
        assert!(r1.is_ok() || r2.is_ok());
        for r in [&r1, &r2] {
            if let Err(e) = r {
                assert!(matches!(e, ApiError::ConcurrencyConflict(_)));
            }
        }

        // 同一 tick 不重复采样
        let logs = env
            .log_repo
            .find_by_stage_since(
                &stage_ids[0],
                &chrono::NaiveDate::from_ymd_opt(2000, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(logs.len(), 1);
    }

    // ==========================================
    // 调度停止
    // ==========================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_lets_inflight_scheduled_cycle_finish() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_process(&env, SamplingFrequency::Continuous).await;

        env.collector.set_value("杀菌温度", 72.0);
        env.collector.set_delay(Duration::from_millis(800));

        // 换成短周期 tick,让调度路径真实触发周期
        env.scheduler
            .start_with_period(&process_id, Duration::from_millis(200))
            .unwrap();

        // 首个 tick 于 200ms 触发,周期随即进入采集延迟;停止落在周期执行中
        tokio::time::sleep(Duration::from_millis(400)).await;
        env.scheduler.stop(&process_id).unwrap();

        // 执行中的周期完整跑完并落库
        tokio::time::sleep(Duration::from_millis(1200)).await;
        let logs = env
            .log_repo
            .find_by_stage_since(&stage_ids[0], &epoch())
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].pass_fail_status, PassFailStatus::Pass);
        assert_eq!(logs[0].measured_value, Some(72.0));

        // 停止后不再有新 tick
        tokio::time::sleep(Duration::from_millis(600)).await;
        let logs_after = env
            .log_repo
            .find_by_stage_since(&stage_ids[0], &epoch())
            .unwrap();
        assert_eq!(logs_after.len(), 1);

        let task = env
            .task_repo
            .find(&process_id, &stage_ids[0])
            .unwrap()
            .unwrap();
        assert_eq!(task.state, TaskScheduleState::Stopped);
    }

    // ==========================================
    // 注册表恢复
    // ==========================================

    #[tokio::test]
    async fn test_registry_recovery_restarts_active_process() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_process(&env, SamplingFrequency::Continuous).await;

        // 模拟进程重启: 新调度器实例只看得到持久化注册表
        let recovered_scheduler = env.rebuild_scheduler();
        let recovered = recovered_scheduler.recover_registry().unwrap();
        assert_eq!(recovered, 1);

        let task = env
            .task_repo
            .find(&process_id, &stage_ids[0])
            .unwrap()
            .unwrap();
        assert_eq!(task.state, TaskScheduleState::Scheduled);

        // 恢复后的调度器照常执行周期
        env.collector.set_value("杀菌温度", 72.0);
        let result = recovered_scheduler.execute_cycle(&process_id).await.unwrap();
        assert_eq!(result.logged, 1);
    }

    #[tokio::test]
    async fn test_registry_recovery_stops_stale_rows() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_process(&env, SamplingFrequency::Continuous).await;

        env.process_api
            .abort_process(&process_id, "质检员A", "批次报废")
            .await
            .unwrap();

        // 人为把注册行改回 SCHEDULED,模拟停机窗口里的失效行
        env.task_repo
            .upsert(&haccp_process_control::domain::monitoring::MonitoringTask {
                process_id: process_id.clone(),
                stage_id: stage_ids[0].clone(),
                state: TaskScheduleState::Scheduled,
                cycle_interval_minutes: 30,
                updated_at: chrono::Utc::now().naive_utc(),
            })
            .unwrap();

        let recovered_scheduler = env.rebuild_scheduler();
        let recovered = recovered_scheduler.recover_registry().unwrap();
        assert_eq!(recovered, 0);

        let task = env
            .task_repo
            .find(&process_id, &stage_ids[0])
            .unwrap()
            .unwrap();
        assert_eq!(task.state, TaskScheduleState::Stopped);
    }

    // ==========================================
    // 监测状态查询
    // ==========================================

    #[tokio::test]
    async fn test_monitoring_status_snapshot() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_process(&env, SamplingFrequency::Continuous).await;

        env.collector.set_value("杀菌温度", 80.0);
        env.monitoring_api.execute_cycle(&process_id).await.unwrap();

        let status = env
            .monitoring_api
            .get_monitoring_status(&process_id)
            .unwrap();
        assert_eq!(status.active_stage_id.as_deref(), Some(&stage_ids[0][..]));
        assert_eq!(status.active_stage_name.as_deref(), Some("杀菌"));
        assert_eq!(status.schedule_state, TaskScheduleState::Scheduled);
        assert_eq!(status.open_alert_count, 1);

        assert_eq!(status.requirements.len(), 1);
        let req = &status.requirements[0];
        assert_eq!(req.parameter_name, "杀菌温度");
        assert!(req.is_mandatory);
        assert!(req.is_critical_limit);
        assert_eq!(req.last_value, Some(80.0));
        assert_eq!(req.last_status, Some(PassFailStatus::Fail));
        assert!(req.last_sampled_at.is_some());
        // 连续监测: 始终到期
        assert!(req.due_now);
    }
}
