// ==========================================
// 阶段状态机集成测试
// ==========================================
// 职责: 验证过程生命周期与五类阶段转换的门控/审计语义
// ==========================================


#[cfg(test)]
mod stage_machine_test {
    use haccp_process_control::api::ApiError;
    use haccp_process_control::domain::process::{ProcessStage, ProductionProcess};
    use haccp_process_control::domain::types::{
        ProcessStatus, SamplingFrequency, StageStatus, TaskScheduleState, TransitionType,
    };
    use haccp_process_control::engine::TransitionRequest;

    use crate::test_helpers::{
        pasteurize_process_templates, setup_test_env, three_stage_templates, TestEnv,
    };

    /// 创建并启动一个两阶段过程,返回 (process_id, 阶段 ID 列表)
    async fn start_pasteurize_process(env: &TestEnv) -> (String, Vec<String>) {
        let process_id = env
            .process_api
            .create_process(
                "巴氏杀菌-批次A",
                "BATCH-2026-001",
                "质检员A",
                &pasteurize_process_templates(SamplingFrequency::Continuous),
            )
            .unwrap();
        env.process_api
            .start_process(&process_id, "质检员A")
            .await
            .unwrap();

        let (_, stages) = env.process_api.get_process(&process_id).unwrap();
        let stage_ids = stages.iter().map(|s| s.stage_id.clone()).collect();
        (process_id, stage_ids)
    }

    // ==========================================
    // 过程生命周期
    // ==========================================

    #[tokio::test]
    async fn test_start_process_activates_first_stage() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_pasteurize_process(&env).await;

        let (process, stages) = env.process_api.get_process(&process_id).unwrap();
        assert_eq!(process.status, ProcessStatus::InProgress);
        assert!(process.started_at.is_some());

        assert_eq!(stages[0].status, StageStatus::InProgress);
        assert!(stages[0].actual_start.is_some());
        assert!(stages[0].readiness_window_start.is_some());
        assert_eq!(stages[1].status, StageStatus::Pending);

        // 红线: 有且仅有一个阶段 IN_PROGRESS
        assert_eq!(env.stage_repo.count_in_progress(&process_id).unwrap(), 1);

        // 调度注册表已写入 SCHEDULED 行
        let task = env
            .task_repo
            .find(&process_id, &stage_ids[0])
            .unwrap()
            .unwrap();
        assert_eq!(task.state, TaskScheduleState::Scheduled);
    }

    #[tokio::test]
    async fn test_start_process_requires_draft() {
        let env = setup_test_env();
        let (process_id, _) = start_pasteurize_process(&env).await;

        let err = env
            .process_api
            .start_process(&process_id, "质检员A")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_create_process_validation() {
        let env = setup_test_env();

        let err = env
            .process_api
            .create_process(
                "  ",
                "B-1",
                "质检员A",
                &pasteurize_process_templates(SamplingFrequency::Continuous),
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err = env
            .process_api
            .create_process("过程X", "B-1", "质检员A", &[])
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_start_rejects_noncontiguous_sequence() {
        let env = setup_test_env();

        // 直接落库构造 sequence_order 为 1, 3 的非法序列
        let process = ProductionProcess::new_draft(
            "非法序列过程".to_string(),
            "B-BAD".to_string(),
            "质检员A".to_string(),
        );
        let process_id = process.process_id.clone();
        env.process_repo.insert(&process).unwrap();

        let s1 = ProcessStage::new_pending(process_id.clone(), "阶段1".to_string(), 1, false, false);
        let s3 = ProcessStage::new_pending(process_id.clone(), "阶段3".to_string(), 3, false, false);
        env.stage_repo.batch_insert(&[s1, s3]).unwrap();

        let err = env
            .process_api
            .start_process(&process_id, "质检员A")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_abort_process() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_pasteurize_process(&env).await;

        // 理由为空被拒绝
        let err = env
            .process_api
            .abort_process(&process_id, "质检员A", "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let process = env
            .process_api
            .abort_process(&process_id, "质检员A", "原料批次污染")
            .await
            .unwrap();
        assert_eq!(process.status, ProcessStatus::Aborted);
        assert!(process.ended_at.is_some());

        // 终态过程无活动阶段,调度注册表无 SCHEDULED 行
        let stage = env.stage_repo.get_by_id(&stage_ids[0]).unwrap();
        assert_eq!(stage.status, StageStatus::RolledBack);
        assert_eq!(env.stage_repo.count_in_progress(&process_id).unwrap(), 0);
        let task = env
            .task_repo
            .find(&process_id, &stage_ids[0])
            .unwrap()
            .unwrap();
        assert_eq!(task.state, TaskScheduleState::Stopped);

        // 终态过程不再接受转换
        let err = env
            .process_api
            .request_transition(
                &process_id,
                &stage_ids[0],
                TransitionType::Normal,
                TransitionRequest::by("质检员A"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::StateConflict(_)));
    }

    // ==========================================
    // NORMAL 转换: 就绪门控
    // ==========================================

    #[tokio::test]
    async fn test_normal_transition_blocked_without_data() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_pasteurize_process(&env).await;

        let err = env
            .process_api
            .request_transition(
                &process_id,
                &stage_ids[0],
                TransitionType::Normal,
                TransitionRequest::by("质检员A"),
            )
            .await
            .unwrap_err();

        match err {
            ApiError::ReadinessNotMet { blocking_issues } => {
                assert!(blocking_issues.iter().any(|i| i.contains("无监测数据")));
            }
            other => panic!("期望 ReadinessNotMet, 实际 {:?}", other),
        }

        // 阶段保持活动,未产生审计记录
        let stage = env.stage_repo.get_by_id(&stage_ids[0]).unwrap();
        assert_eq!(stage.status, StageStatus::InProgress);
        assert!(env
            .process_api
            .list_transitions(&process_id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_normal_transition_advances_after_samples() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_pasteurize_process(&env).await;

        env.collector.set_value("杀菌温度", 72.0);
        let cycle = env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        assert_eq!(cycle.logged, 1);
        assert!(cycle.alert_ids.is_empty());

        let result = env
            .process_api
            .request_transition(
                &process_id,
                &stage_ids[0],
                TransitionType::Normal,
                TransitionRequest::by("质检员A"),
            )
            .await
            .unwrap();

        assert_eq!(result.transition_type, TransitionType::Normal);
        assert_eq!(result.activated_stage_id.as_deref(), Some(&stage_ids[1][..]));
        assert!(!result.process_completed);
        assert!(!result.bypassed_checks);
        let readiness = result.readiness.expect("NORMAL 结果应附带就绪评估");
        assert!(readiness.ready);

        let (_, stages) = env.process_api.get_process(&process_id).unwrap();
        assert_eq!(stages[0].status, StageStatus::Completed);
        assert!(stages[0].actual_end.is_some());
        assert_eq!(stages[1].status, StageStatus::InProgress);
        assert_eq!(env.stage_repo.count_in_progress(&process_id).unwrap(), 1);

        // 审计记录
        let records = env.process_api.list_transitions(&process_id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].transition_type, TransitionType::Normal);
        assert!(!records[0].bypassed_checks);
    }

    #[tokio::test]
    async fn test_normal_on_last_stage_completes_process() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_pasteurize_process(&env).await;

        env.collector.set_value("杀菌温度", 72.0);
        env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        env.process_api
            .request_transition(
                &process_id,
                &stage_ids[0],
                TransitionType::Normal,
                TransitionRequest::by("质检员A"),
            )
            .await
            .unwrap();

        env.collector.set_value("冷却温度", 4.0);
        env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        let result = env
            .process_api
            .request_transition(
                &process_id,
                &stage_ids[1],
                TransitionType::Normal,
                TransitionRequest::by("质检员A"),
            )
            .await
            .unwrap();

        assert!(result.process_completed);
        assert!(result.activated_stage_id.is_none());

        let (process, _) = env.process_api.get_process(&process_id).unwrap();
        assert_eq!(process.status, ProcessStatus::Completed);
        assert!(process.ended_at.is_some());
        assert_eq!(env.stage_repo.count_in_progress(&process_id).unwrap(), 0);
        assert!(env.task_repo.list_scheduled().unwrap().is_empty());
    }

    // ==========================================
    // EMERGENCY / SKIP 转换
    // ==========================================

    #[tokio::test]
    async fn test_emergency_bypasses_readiness() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_pasteurize_process(&env).await;

        // 无任何监测数据,EMERGENCY 仍然放行
        let result = env
            .process_api
            .request_transition(
                &process_id,
                &stage_ids[0],
                TransitionType::Emergency,
                TransitionRequest::by("车间主任").with_reason("设备故障需紧急转产"),
            )
            .await
            .unwrap();

        assert_eq!(result.transition_type, TransitionType::Emergency);
        assert!(result.bypassed_checks);
        assert!(result.readiness.is_none());
        assert_eq!(result.activated_stage_id.as_deref(), Some(&stage_ids[1][..]));

        let records = env.process_api.list_transitions(&process_id).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].bypassed_checks);
    }

    #[tokio::test]
    async fn test_skip_requires_prerequisites_flag() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_pasteurize_process(&env).await;

        let err = env
            .process_api
            .request_transition(
                &process_id,
                &stage_ids[0],
                TransitionType::Skip,
                TransitionRequest::by("质检员A").with_reason("当日免做"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let result = env
            .process_api
            .request_transition(
                &process_id,
                &stage_ids[0],
                TransitionType::Skip,
                TransitionRequest::by("质检员A")
                    .with_reason("当日免做")
                    .with_prerequisites_met(),
            )
            .await
            .unwrap();

        assert_eq!(result.transition_type, TransitionType::Skip);
        let (_, stages) = env.process_api.get_process(&process_id).unwrap();
        assert_eq!(stages[0].status, StageStatus::Skipped);
        assert_eq!(stages[1].status, StageStatus::InProgress);
    }

    // ==========================================
    // ROLLBACK / REWORK 转换
    // ==========================================

    #[tokio::test]
    async fn test_rollback_to_earlier_stage() {
        let env = setup_test_env();
        let process_id = env
            .process_api
            .create_process("三段过程", "B-3", "质检员A", &three_stage_templates())
            .unwrap();
        env.process_api
            .start_process(&process_id, "质检员A")
            .await
            .unwrap();
        let (_, stages) = env.process_api.get_process(&process_id).unwrap();

        // 预处理无监测要求,NORMAL 直接推进到杀菌,再 EMERGENCY 到冷却
        env.process_api
            .request_transition(
                &process_id,
                &stages[0].stage_id,
                TransitionType::Normal,
                TransitionRequest::by("质检员A"),
            )
            .await
            .unwrap();
        env.process_api
            .request_transition(
                &process_id,
                &stages[1].stage_id,
                TransitionType::Emergency,
                TransitionRequest::by("车间主任").with_reason("赶工"),
            )
            .await
            .unwrap();

        // 缺理由被拒绝
        let err = env
            .process_api
            .request_transition(
                &process_id,
                &stages[2].stage_id,
                TransitionType::Rollback,
                TransitionRequest::by("质检员A").with_target_stage(&stages[0].stage_id),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        // 缺目标被拒绝
        let err = env
            .process_api
            .request_transition(
                &process_id,
                &stages[2].stage_id,
                TransitionType::Rollback,
                TransitionRequest::by("质检员A").with_reason("杀菌记录异常"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        // 回退到预处理: 当前阶段 ROLLED_BACK,中间的杀菌重置为 PENDING
        let result = env
            .process_api
            .request_transition(
                &process_id,
                &stages[2].stage_id,
                TransitionType::Rollback,
                TransitionRequest::by("质检员A")
                    .with_reason("杀菌记录异常")
                    .with_target_stage(&stages[0].stage_id),
            )
            .await
            .unwrap();

        assert_eq!(result.transition_type, TransitionType::Rollback);
        assert_eq!(
            result.activated_stage_id.as_deref(),
            Some(&stages[0].stage_id[..])
        );

        let (_, after) = env.process_api.get_process(&process_id).unwrap();
        assert_eq!(after[0].status, StageStatus::InProgress);
        assert_eq!(after[1].status, StageStatus::Pending);
        assert_eq!(after[2].status, StageStatus::RolledBack);
        assert_eq!(env.stage_repo.count_in_progress(&process_id).unwrap(), 1);

        let records = env.process_api.list_transitions(&process_id).unwrap();
        let rollback = records
            .iter()
            .find(|r| r.transition_type == TransitionType::Rollback)
            .unwrap();
        assert_eq!(
            rollback.target_stage_id.as_deref(),
            Some(&stages[0].stage_id[..])
        );
        assert_eq!(rollback.reason.as_deref(), Some("杀菌记录异常"));
    }

    #[tokio::test]
    async fn test_rollback_target_must_be_earlier() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_pasteurize_process(&env).await;

        let err = env
            .process_api
            .request_transition(
                &process_id,
                &stage_ids[0],
                TransitionType::Rollback,
                TransitionRequest::by("质检员A")
                    .with_reason("误操作")
                    .with_target_stage(&stage_ids[1]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_rework_resets_readiness_window() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_pasteurize_process(&env).await;

        env.collector.set_value("杀菌温度", 72.0);
        env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        assert!(env
            .monitoring_api
            .evaluate_stage_completion(&stage_ids[0])
            .unwrap()
            .ready);

        // 时间戳秒级精度: 等待以保证返工窗口严格晚于既有日志
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let before = env.stage_repo.get_by_id(&stage_ids[0]).unwrap();
        let result = env
            .process_api
            .request_transition(
                &process_id,
                &stage_ids[0],
                TransitionType::Rework,
                TransitionRequest::by("质检员A").with_reason("温度曲线需重做"),
            )
            .await
            .unwrap();
        assert_eq!(result.transition_type, TransitionType::Rework);
        assert_eq!(result.activated_stage_id.as_deref(), Some(&stage_ids[0][..]));

        let after = env.stage_repo.get_by_id(&stage_ids[0]).unwrap();
        assert_eq!(after.status, StageStatus::InProgress);
        assert!(after.readiness_window_start.unwrap() > before.readiness_window_start.unwrap());

        // 窗口重置后既有日志不再计入,重新回到"无监测数据"
        let readiness = env
            .monitoring_api
            .evaluate_stage_completion(&stage_ids[0])
            .unwrap();
        assert!(!readiness.ready);
        assert!(readiness
            .blocking_issues
            .iter()
            .any(|i| i.contains("无监测数据")));
    }

    // ==========================================
    // 并发控制
    // ==========================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_single_winner() {
        let env = setup_test_env();
        let (process_id, stage_ids) = start_pasteurize_process(&env).await;

        env.collector.set_value("杀菌温度", 72.0);
        env.monitoring_api.execute_cycle(&process_id).await.unwrap();

        let api1 = env.process_api.clone();
        let api2 = env.process_api.clone();
        let (pid1, sid1) = (process_id.clone(), stage_ids[0].clone());
        let (pid2, sid2) = (process_id.clone(), stage_ids[0].clone());

        let t1 = tokio::spawn(async move {
            api1.request_transition(
                &pid1,
                &sid1,
                TransitionType::Normal,
                TransitionRequest::by("质检员A"),
            )
            .await
        });
        let t2 = tokio::spawn(async move {
            api2.request_transition(
                &pid2,
                &sid2,
                TransitionType::Normal,
                TransitionRequest::by("质检员B"),
            )
            .await
        });

        let r1 = t1.await.unwrap();
        let r2 = t2.await.unwrap();

        // 恰好一个成功;败者要么并发冲突被拒,要么看到阶段已转出
        let successes = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let loser = if r1.is_err() { r1 } else { r2 };
        assert!(matches!(
            loser.unwrap_err(),
            ApiError::ConcurrencyConflict(_) | ApiError::StateConflict(_)
        ));

        // 状态一致: 阶段 1 关闭一次,阶段 2 激活,审计仅一条
        let (_, stages) = env.process_api.get_process(&process_id).unwrap();
        assert_eq!(stages[0].status, StageStatus::Completed);
        assert_eq!(stages[1].status, StageStatus::InProgress);
        assert_eq!(env.stage_repo.count_in_progress(&process_id).unwrap(), 1);
        assert_eq!(env.process_api.list_transitions(&process_id).unwrap().len(), 1);
    }
}
