// ==========================================
// HACCP 过程控制系统 - 领域类型定义
// ==========================================
// 红线: 状态是枚举制,不是字符串自由文本
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 生产过程状态 (Process Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Draft,      // 草稿(未启动)
    InProgress, // 执行中
    Completed,  // 已完成
    Aborted,    // 已中止
}

impl ProcessStatus {
    /// 是否终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessStatus::Completed | ProcessStatus::Aborted)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Draft => write!(f, "DRAFT"),
            ProcessStatus::InProgress => write!(f, "IN_PROGRESS"),
            ProcessStatus::Completed => write!(f, "COMPLETED"),
            ProcessStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(ProcessStatus::Draft),
            "IN_PROGRESS" => Ok(ProcessStatus::InProgress),
            "COMPLETED" => Ok(ProcessStatus::Completed),
            "ABORTED" => Ok(ProcessStatus::Aborted),
            other => Err(format!("未知的过程状态: {}", other)),
        }
    }
}

// ==========================================
// 阶段状态 (Stage Status)
// ==========================================
// 红线: 阶段只能由 ProcessStageMachine 变更
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,    // 待执行
    InProgress, // 执行中
    Completed,  // 已完成
    Skipped,    // 已跳过
    RolledBack, // 已回退
    Rework,     // 返工中(瞬时状态,立即回到 IN_PROGRESS)
}

impl StageStatus {
    /// 前序阶段是否满足激活条件
    pub fn satisfies_predecessor(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "PENDING"),
            StageStatus::InProgress => write!(f, "IN_PROGRESS"),
            StageStatus::Completed => write!(f, "COMPLETED"),
            StageStatus::Skipped => write!(f, "SKIPPED"),
            StageStatus::RolledBack => write!(f, "ROLLED_BACK"),
            StageStatus::Rework => write!(f, "REWORK"),
        }
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(StageStatus::Pending),
            "IN_PROGRESS" => Ok(StageStatus::InProgress),
            "COMPLETED" => Ok(StageStatus::Completed),
            "SKIPPED" => Ok(StageStatus::Skipped),
            "ROLLED_BACK" => Ok(StageStatus::RolledBack),
            "REWORK" => Ok(StageStatus::Rework),
            other => Err(format!("未知的阶段状态: {}", other)),
        }
    }
}

// ==========================================
// 监测参数类型 (Parameter Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterType {
    Temperature, // 温度
    Ph,          // pH 值
    Time,        // 时间
    Pressure,    // 压力
    Visual,      // 目视检查
    Weight,      // 重量
    Humidity,    // 湿度
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterType::Temperature => write!(f, "TEMPERATURE"),
            ParameterType::Ph => write!(f, "PH"),
            ParameterType::Time => write!(f, "TIME"),
            ParameterType::Pressure => write!(f, "PRESSURE"),
            ParameterType::Visual => write!(f, "VISUAL"),
            ParameterType::Weight => write!(f, "WEIGHT"),
            ParameterType::Humidity => write!(f, "HUMIDITY"),
        }
    }
}

impl FromStr for ParameterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEMPERATURE" => Ok(ParameterType::Temperature),
            "PH" => Ok(ParameterType::Ph),
            "TIME" => Ok(ParameterType::Time),
            "PRESSURE" => Ok(ParameterType::Pressure),
            "VISUAL" => Ok(ParameterType::Visual),
            "WEIGHT" => Ok(ParameterType::Weight),
            "HUMIDITY" => Ok(ParameterType::Humidity),
            other => Err(format!("未知的参数类型: {}", other)),
        }
    }
}

// ==========================================
// 采样频率 (Sampling Frequency)
// ==========================================
// 到期判定约定: next_due_at <= now 即到期(统一闭区间,见 due_check)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingFrequency {
    /// 连续监测: 每个监测周期都采样
    Continuous,
    /// 每 N 分钟采样一次
    EveryNMinutes(i64),
    /// 每小时采样一次
    Hourly,
    /// 每批次采样一次(阶段激活后采样一次)
    PerBatch,
}

impl SamplingFrequency {
    /// 采样间隔(分钟); Continuous/PerBatch 无固定间隔
    pub fn interval_minutes(&self) -> Option<i64> {
        match self {
            SamplingFrequency::Continuous => None,
            SamplingFrequency::EveryNMinutes(n) => Some(*n),
            SamplingFrequency::Hourly => Some(60),
            SamplingFrequency::PerBatch => None,
        }
    }

    /// 数据库存储格式: CONTINUOUS / EVERY_30_MINUTES / HOURLY / PER_BATCH
    pub fn as_db_str(&self) -> String {
        match self {
            SamplingFrequency::Continuous => "CONTINUOUS".to_string(),
            SamplingFrequency::EveryNMinutes(n) => format!("EVERY_{}_MINUTES", n),
            SamplingFrequency::Hourly => "HOURLY".to_string(),
            SamplingFrequency::PerBatch => "PER_BATCH".to_string(),
        }
    }

    /// 从数据库存储格式解析
    pub fn parse_db_str(s: &str) -> Result<Self, String> {
        match s {
            "CONTINUOUS" => Ok(SamplingFrequency::Continuous),
            "HOURLY" => Ok(SamplingFrequency::Hourly),
            "PER_BATCH" => Ok(SamplingFrequency::PerBatch),
            other => {
                if let Some(rest) = other.strip_prefix("EVERY_") {
                    if let Some(num) = rest.strip_suffix("_MINUTES") {
                        let n: i64 = num
                            .parse()
                            .map_err(|_| format!("无效的采样间隔: {}", other))?;
                        if n <= 0 {
                            return Err(format!("采样间隔必须为正: {}", other));
                        }
                        return Ok(SamplingFrequency::EveryNMinutes(n));
                    }
                }
                Err(format!("未知的采样频率: {}", other))
            }
        }
    }
}

// ==========================================
// 偏差严重度 (Deviation Severity)
// ==========================================
// 红线: 等级制,按 25%/50% 阈值单调递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviationSeverity {
    None,     // 无偏差(限值内)
    Info,     // 轻微偏差
    Warning,  // 警告偏差
    Critical, // 关键偏差
}

impl fmt::Display for DeviationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviationSeverity::None => write!(f, "NONE"),
            DeviationSeverity::Info => write!(f, "INFO"),
            DeviationSeverity::Warning => write!(f, "WARNING"),
            DeviationSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl FromStr for DeviationSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(DeviationSeverity::None),
            "INFO" => Ok(DeviationSeverity::Info),
            "WARNING" => Ok(DeviationSeverity::Warning),
            "CRITICAL" => Ok(DeviationSeverity::Critical),
            other => Err(format!("未知的偏差严重度: {}", other)),
        }
    }
}

// ==========================================
// 采样结果 (Pass/Fail Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassFailStatus {
    Pass,    // 合格
    Fail,    // 不合格
    Skipped, // 采集失败跳过(下周期重试)
}

impl fmt::Display for PassFailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassFailStatus::Pass => write!(f, "PASS"),
            PassFailStatus::Fail => write!(f, "FAIL"),
            PassFailStatus::Skipped => write!(f, "SKIPPED"),
        }
    }
}

impl FromStr for PassFailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(PassFailStatus::Pass),
            "FAIL" => Ok(PassFailStatus::Fail),
            "SKIPPED" => Ok(PassFailStatus::Skipped),
            other => Err(format!("未知的采样结果: {}", other)),
        }
    }
}

// ==========================================
// 阶段转换类型 (Transition Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionType {
    Normal,    // 正常完成(就绪门控)
    Rollback,  // 回退到早前阶段(绕过门控)
    Skip,      // 跳过(需 prerequisites_met 审批)
    Emergency, // 紧急放行(绕过门控,记录 bypassed_checks)
    Rework,    // 返工(重置就绪窗口)
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionType::Normal => write!(f, "NORMAL"),
            TransitionType::Rollback => write!(f, "ROLLBACK"),
            TransitionType::Skip => write!(f, "SKIP"),
            TransitionType::Emergency => write!(f, "EMERGENCY"),
            TransitionType::Rework => write!(f, "REWORK"),
        }
    }
}

impl FromStr for TransitionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(TransitionType::Normal),
            "ROLLBACK" => Ok(TransitionType::Rollback),
            "SKIP" => Ok(TransitionType::Skip),
            "EMERGENCY" => Ok(TransitionType::Emergency),
            "REWORK" => Ok(TransitionType::Rework),
            other => Err(format!("未知的转换类型: {}", other)),
        }
    }
}

// ==========================================
// 合规状态 (Compliance Status)
// ==========================================
// ReadinessEvaluator 输出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Compliant,    // 合规
    MinorIssues,  // 存在非关键问题
    NonCompliant, // 不合规(存在关键条件)
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplianceStatus::Compliant => write!(f, "COMPLIANT"),
            ComplianceStatus::MinorIssues => write!(f, "MINOR_ISSUES"),
            ComplianceStatus::NonCompliant => write!(f, "NON_COMPLIANT"),
        }
    }
}

// ==========================================
// 监测任务调度状态 (Task Schedule State)
// ==========================================
// 持久化于 monitoring_task 表,重启后可恢复
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskScheduleState {
    Stopped,   // 未调度
    Scheduled, // 已调度(周期采样中)
}

impl fmt::Display for TaskScheduleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskScheduleState::Stopped => write!(f, "STOPPED"),
            TaskScheduleState::Scheduled => write!(f, "SCHEDULED"),
        }
    }
}

impl FromStr for TaskScheduleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOPPED" => Ok(TaskScheduleState::Stopped),
            "SCHEDULED" => Ok(TaskScheduleState::Scheduled),
            other => Err(format!("未知的调度状态: {}", other)),
        }
    }
}
