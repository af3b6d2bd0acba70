// ==========================================
// HACCP 过程控制系统 - 通知事件发布
// ==========================================
// 职责: 定义预警/转换事件发布 trait,实现依赖倒置
// 说明: Engine 层定义 trait, 通知集成方实现适配器
// 红线: 事件发布是旁路通道,发布失败不得影响控制路径的成败
// ==========================================

use crate::domain::types::{DeviationSeverity, TransitionType};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

// ==========================================
// 通知事件类型
// ==========================================

/// 通知事件
///
/// Engine 层发布给通知集成方的只追加事件流;
/// 投递机制与格式化由集成方负责,此处不阻塞等待。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationEvent {
    /// 预警已创建
    AlertRaised {
        alert_id: String,
        process_id: String,
        stage_id: String,
        severity: DeviationSeverity,
        requires_immediate_action: bool,
        message: String,
    },
    /// 预警已解决
    AlertResolved {
        alert_id: String,
        process_id: String,
        resolved_by: String,
    },
    /// 阶段转换已应用
    TransitionApplied {
        process_id: String,
        stage_id: String,
        transition_type: TransitionType,
        bypassed_checks: bool,
    },
    /// 阶段转换被就绪门控阻断
    TransitionBlocked {
        process_id: String,
        stage_id: String,
        blocking_issues: Vec<String>,
    },
    /// 过程已完成
    ProcessCompleted {
        process_id: String,
        completed_at: NaiveDateTime,
    },
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 通知事件发布者 Trait
///
/// Engine 层定义,集成方实现;通过 trait 实现依赖倒置,
/// 解除 Engine → 通知投递的直接依赖
pub trait NotificationPublisher: Send + Sync {
    /// 发布通知事件
    ///
    /// # 约束
    /// 实现必须立即返回,不得阻塞控制路径
    fn publish(&self, event: NotificationEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
///
/// 用于不需要通知的场景(如单元测试)
#[derive(Debug, Clone, Default)]
pub struct NoOpNotificationPublisher;

impl NotificationPublisher for NoOpNotificationPublisher {
    fn publish(&self, event: NotificationEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        debug!("NoOpNotificationPublisher: 跳过事件发布 - {:?}", event);
        Ok(())
    }
}

// ==========================================
// 通道发布者 - 无界队列 + 后台消费
// ==========================================

/// 基于 tokio mpsc 无界通道的发布者
///
/// publish 仅入队,由后台任务异步消费;通道关闭时事件被丢弃并记日志,
/// 绝不向控制路径传播失败。
pub struct ChannelNotificationPublisher {
    sender: mpsc::UnboundedSender<NotificationEvent>,
}

impl ChannelNotificationPublisher {
    /// 创建发布者及其接收端
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationPublisher for ChannelNotificationPublisher {
    fn publish(&self, event: NotificationEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Err(e) = self.sender.send(event) {
            // 消费端已退出: 记日志丢弃,不影响控制决策
            warn!("通知通道已关闭,事件被丢弃: {}", e);
        }
        Ok(())
    }
}

// ==========================================
// 可选发布者包装
// ==========================================

/// 可选的事件发布者包装
///
/// 简化 Option<Arc<dyn NotificationPublisher>> 的使用
pub struct OptionalNotificationPublisher {
    inner: Option<Arc<dyn NotificationPublisher>>,
}

impl OptionalNotificationPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn NotificationPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例(不发布事件)
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件(如果有发布者);失败仅记日志
    pub fn publish(&self, event: NotificationEvent) {
        if let Some(publisher) = &self.inner {
            if let Err(e) = publisher.publish(event) {
                warn!("通知事件发布失败(已忽略): {}", e);
            }
        } else {
            debug!("未配置通知发布者,跳过事件");
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalNotificationPublisher {
    fn default() -> Self {
        Self::none()
    }
}
