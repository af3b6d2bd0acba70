// ==========================================
// HACCP 过程控制系统 - 参数采集能力接口
// ==========================================
// 职责: 隔离测量值的物理获取方式(传感器/人工录入)
// 红线: 核心只依赖本契约,不内嵌任何模拟/随机采样逻辑,
//       测试用确定性假采集器驱动
// ==========================================

use crate::domain::monitoring::MonitoringRequirement;
use async_trait::async_trait;
use std::error::Error;

// ==========================================
// CollectedSample - 一次采集结果
// ==========================================
#[derive(Debug, Clone)]
pub struct CollectedSample {
    pub value: f64,
    /// 采集方式(如 SENSOR / MANUAL_ENTRY)
    pub method: String,
    /// 采集设备标识
    pub equipment_id: Option<String>,
}

// ==========================================
// ParameterCollector - 采集能力 trait
// ==========================================
/// 参数采集能力接口
///
/// 调度器通过本接口获取实测值,并以有界超时包裹调用;
/// 单个要求的采集失败被隔离为软失败,下周期重试。
#[async_trait]
pub trait ParameterCollector: Send + Sync {
    /// 采集一次指定监测要求的实测值
    async fn collect(
        &self,
        requirement: &MonitoringRequirement,
    ) -> Result<CollectedSample, Box<dyn Error + Send + Sync>>;
}
