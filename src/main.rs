// ==========================================
// HACCP 过程控制系统 - 服务主入口
// ==========================================
// 职责: 初始化日志/数据库,恢复监测调度注册表,常驻运行
// 说明: 参数采集通道由部署方通过 ParameterCollector 接入;
//       未接入时采样记为跳过,下周期重试
// ==========================================

use haccp_process_control::config::ConfigManager;
use haccp_process_control::db;
use haccp_process_control::engine::{
    AlertManager, ChannelNotificationPublisher, CollectedSample, MonitoringScheduler,
    OptionalNotificationPublisher, ParameterCollector,
};
use haccp_process_control::logging;
use haccp_process_control::repository::{
    AlertRepository, MonitoringLogRepository, MonitoringRequirementRepository,
    MonitoringTaskRepository, ProcessStageRepository, ProductionProcessRepository,
};
use haccp_process_control::MonitoringRequirement;

use async_trait::async_trait;
use std::error::Error;
use std::sync::{Arc, Mutex};

/// 未接入采集通道时的占位采集器: 所有采样记为跳过
struct UnconfiguredCollector;

#[async_trait]
impl ParameterCollector for UnconfiguredCollector {
    async fn collect(
        &self,
        requirement: &MonitoringRequirement,
    ) -> Result<CollectedSample, Box<dyn Error + Send + Sync>> {
        Err(format!(
            "未接入参数采集通道: requirement_id={}",
            requirement.requirement_id
        )
        .into())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", haccp_process_control::APP_NAME);
    tracing::info!("系统版本: {}", haccp_process_control::VERSION);
    tracing::info!("==================================================");

    // 数据库路径: 环境变量优先
    let db_path =
        std::env::var("HACCP_DB_PATH").unwrap_or_else(|_| "haccp_process_control.db".to_string());
    tracing::info!("使用数据库: {}", db_path);

    let conn = db::open_sqlite_connection(&db_path)?;
    db::init_schema(&conn)?;
    if let Some(version) = db::read_schema_version(&conn)? {
        if version != db::CURRENT_SCHEMA_VERSION {
            tracing::warn!(
                "schema_version={} 与期望版本 {} 不一致,请确认迁移状态",
                version,
                db::CURRENT_SCHEMA_VERSION
            );
        }
    }
    let conn = Arc::new(Mutex::new(conn));

    // 装配仓储与引擎
    let process_repo = Arc::new(ProductionProcessRepository::from_connection(conn.clone()));
    let stage_repo = Arc::new(ProcessStageRepository::from_connection(conn.clone()));
    let requirement_repo = Arc::new(MonitoringRequirementRepository::from_connection(conn.clone()));
    let log_repo = Arc::new(MonitoringLogRepository::from_connection(conn.clone()));
    let alert_repo = Arc::new(AlertRepository::from_connection(conn.clone()));
    let task_repo = Arc::new(MonitoringTaskRepository::from_connection(conn.clone()));

    let config_manager = ConfigManager::from_connection(conn.clone())?;
    let monitoring_config = config_manager.monitoring_config();

    // 通知事件: 无界通道入队,后台任务以 JSON 行输出,供外部通知集成消费
    let (publisher, mut event_receiver) = ChannelNotificationPublisher::new();
    tokio::spawn(async move {
        while let Some(event) = event_receiver.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => tracing::info!(target: "haccp_events", "{}", json),
                Err(e) => tracing::warn!("通知事件序列化失败: {}", e),
            }
        }
    });

    let alert_manager = Arc::new(AlertManager::new(
        log_repo.clone(),
        alert_repo.clone(),
        OptionalNotificationPublisher::with_publisher(Arc::new(publisher)),
    ));

    let scheduler = Arc::new(MonitoringScheduler::new(
        process_repo,
        stage_repo,
        requirement_repo,
        log_repo,
        alert_repo,
        task_repo,
        alert_manager,
        Arc::new(UnconfiguredCollector),
        monitoring_config,
    ));

    // 启动恢复: 按注册表与阶段状态重建调度(内存任务字典不可恢复的替代方案)
    let recovered = scheduler.recover_registry()?;
    tracing::info!("已恢复 {} 个过程的监测调度", recovered);

    tracing::info!("服务就绪,等待终止信号...");
    tokio::signal::ctrl_c().await?;

    tracing::info!("收到终止信号,退出");
    Ok(())
}
