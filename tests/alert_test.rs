// ==========================================
// 预警生命周期集成测试
// ==========================================
// 职责: 验证预警创建/解决的语义与日志-预警原子性约束
// ==========================================


#[cfg(test)]
mod alert_test {
    use haccp_process_control::api::ApiError;
    use haccp_process_control::domain::monitoring::MonitoringLog;
    use haccp_process_control::domain::types::{
        DeviationSeverity, PassFailStatus, SamplingFrequency,
    };
    use haccp_process_control::repository::RepositoryError;
    use uuid::Uuid;

    use crate::test_helpers::{pasteurize_process_templates, setup_test_env};

    #[tokio::test]
    async fn test_resolve_alert_lifecycle() {
        let env = setup_test_env();
        let process_id = env
            .process_api
            .create_process(
                "巴氏杀菌-批次E",
                "BATCH-2026-007",
                "质检员A",
                &pasteurize_process_templates(SamplingFrequency::Continuous),
            )
            .unwrap();
        env.process_api
            .start_process(&process_id, "质检员A")
            .await
            .unwrap();

        env.collector.set_value("杀菌温度", 80.0);
        let cycle = env.monitoring_api.execute_cycle(&process_id).await.unwrap();
        let alert_id = cycle.alert_ids[0].clone();

        let resolved = env
            .monitoring_api
            .resolve_alert(&alert_id, "质检员B", Some("延长杀菌时间后复测合格"))
            .unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("质检员B"));
        assert!(resolved.resolved_at.is_some());
        assert_eq!(
            resolved.resolution_notes.as_deref(),
            Some("延长杀菌时间后复测合格")
        );

        assert!(env
            .monitoring_api
            .list_open_alerts(&process_id, None)
            .unwrap()
            .is_empty());

        // 幂等性: 重复解决被拒绝
        let err = env
            .monitoring_api
            .resolve_alert(&alert_id, "质检员B", None)
            .unwrap_err();
        assert!(matches!(err, ApiError::AlreadyResolved(_)));

        // 不存在的预警
        let err = env
            .monitoring_api
            .resolve_alert("no-such-alert", "质检员B", None)
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_open_alerts_filters_by_stage() {
        let env = setup_test_env();
        let process_id = env
            .process_api
            .create_process(
                "巴氏杀菌-批次F",
                "BATCH-2026-008",
                "质检员A",
                &pasteurize_process_templates(SamplingFrequency::Continuous),
            )
            .unwrap();
        env.process_api
            .start_process(&process_id, "质检员A")
            .await
            .unwrap();
        let (_, stages) = env.process_api.get_process(&process_id).unwrap();

        env.collector.set_value("杀菌温度", 80.0);
        env.monitoring_api.execute_cycle(&process_id).await.unwrap();

        let by_stage = env
            .monitoring_api
            .list_open_alerts(&process_id, Some(&stages[0].stage_id))
            .unwrap();
        assert_eq!(by_stage.len(), 1);

        let other_stage = env
            .monitoring_api
            .list_open_alerts(&process_id, Some(&stages[1].stage_id))
            .unwrap();
        assert!(other_stage.is_empty());
    }

    /// 红线: 超限 FAIL 日志不允许在没有预警的情况下落库
    #[tokio::test]
    async fn test_out_of_limits_fail_log_requires_alert() {
        let env = setup_test_env();
        let process_id = env
            .process_api
            .create_process(
                "巴氏杀菌-批次G",
                "BATCH-2026-009",
                "质检员A",
                &pasteurize_process_templates(SamplingFrequency::Continuous),
            )
            .unwrap();
        env.process_api
            .start_process(&process_id, "质检员A")
            .await
            .unwrap();
        let (_, stages) = env.process_api.get_process(&process_id).unwrap();
        let requirement = env
            .requirement_repo
            .find_active_by_stage(&stages[0].stage_id)
            .unwrap()
            .into_iter()
            .next()
            .unwrap();

        let log = MonitoringLog {
            log_id: Uuid::new_v4().to_string(),
            requirement_id: requirement.requirement_id.clone(),
            stage_id: stages[0].stage_id.clone(),
            process_id: process_id.clone(),
            recorded_at: chrono::Utc::now().naive_utc(),
            measured_value: Some(80.0),
            within_limits: false,
            pass_fail_status: PassFailStatus::Fail,
            deviation_severity: DeviationSeverity::Critical,
            measurement_method: Some("MANUAL_ENTRY".to_string()),
            equipment_id: None,
        };

        let err = env.log_repo.insert_with_alert(&log, None).unwrap_err();
        assert!(matches!(err, RepositoryError::ValidationError(_)));
    }
}
