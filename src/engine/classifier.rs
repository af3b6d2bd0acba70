// ==========================================
// HACCP 过程控制系统 - 偏差分类引擎
// ==========================================
// 职责: 实测值对容差窗口的合规判定与严重度分级
// 输入: 实测值 + 监测要求容差配置
// 输出: (within_limits, severity)
// 红线: 纯函数,无副作用,无状态
// 红线: 关键限值超限无条件 CRITICAL
// 红线: 容差边界为闭区间(实测值等于 tolerance_max 判定为限值内)
// ==========================================

use crate::domain::monitoring::MonitoringRequirement;
use crate::domain::types::DeviationSeverity;
use crate::engine::error::{EngineError, EngineResult};

/// 严重度阈值: 偏差百分比 > 50% 判 CRITICAL
const CRITICAL_DEVIATION_PCT: f64 = 50.0;
/// 严重度阈值: 偏差百分比 > 25% 判 WARNING
const WARNING_DEVIATION_PCT: f64 = 25.0;

// ==========================================
// Classification - 分类结果
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub within_limits: bool,
    pub severity: DeviationSeverity,
    /// 双侧限值时的偏差百分比;单侧/无目标值时为 None
    pub deviation_pct: Option<f64>,
}

// ==========================================
// DeviationClassifier - 偏差分类引擎
// ==========================================
pub struct DeviationClassifier {
    // 无状态引擎,不需要注入依赖
}

impl DeviationClassifier {
    pub fn new() -> Self {
        Self {}
    }

    /// 分类一次实测值
    ///
    /// # 参数
    /// - value: 实测值
    /// - requirement: 监测要求(容差配置)
    ///
    /// # 返回
    /// - Ok(Classification): 合规判定 + 严重度
    /// - Err(Validation): 容差配置无法支撑判定(双侧限值缺目标值)
    ///
    /// # 规则
    /// 1. within_limits = value ∈ [tolerance_min, tolerance_max] (闭区间,缺失侧无界)
    /// 2. 关键限值超限 → CRITICAL,无条件
    /// 3. 双侧限值: deviation_pct = |value - target| / (max - min) * 100;
    ///    > 50% → CRITICAL, > 25% → WARNING, 否则超限 INFO / 限值内 NONE
    /// 4. 单侧限值无法计算百分比: 超限回退 WARNING
    pub fn classify(
        &self,
        value: f64,
        requirement: &MonitoringRequirement,
    ) -> EngineResult<Classification> {
        if requirement.tolerance_min.is_none() && requirement.tolerance_max.is_none() {
            return Err(EngineError::Validation(format!(
                "监测要求 {} 未配置任何容差边界,无法判定",
                requirement.requirement_id
            )));
        }

        let below = requirement.tolerance_min.map(|min| value < min).unwrap_or(false);
        let above = requirement.tolerance_max.map(|max| value > max).unwrap_or(false);
        let within_limits = !below && !above;

        // 关键限值超限: 无条件 CRITICAL
        if requirement.is_critical_limit && !within_limits {
            return Ok(Classification {
                within_limits: false,
                severity: DeviationSeverity::Critical,
                deviation_pct: self.deviation_pct(value, requirement)?,
            });
        }

        let deviation_pct = self.deviation_pct(value, requirement)?;

        let severity = match deviation_pct {
            Some(pct) => {
                if pct > CRITICAL_DEVIATION_PCT {
                    DeviationSeverity::Critical
                } else if pct > WARNING_DEVIATION_PCT {
                    DeviationSeverity::Warning
                } else if within_limits {
                    DeviationSeverity::None
                } else {
                    DeviationSeverity::Info
                }
            }
            // 单侧限值: 无法计算百分比,超限回退 WARNING
            None => {
                if within_limits {
                    DeviationSeverity::None
                } else {
                    DeviationSeverity::Warning
                }
            }
        };

        Ok(Classification {
            within_limits,
            severity,
            deviation_pct,
        })
    }

    /// 计算偏差百分比;仅双侧限值可计算
    ///
    /// # 返回
    /// - Ok(Some(pct)): 双侧限值且目标值存在
    /// - Ok(None): 单侧限值(无法计算)
    /// - Err(Validation): 双侧限值但目标值缺失,或容差窗口宽度非正
    fn deviation_pct(
        &self,
        value: f64,
        requirement: &MonitoringRequirement,
    ) -> EngineResult<Option<f64>> {
        let (min, max) = match (requirement.tolerance_min, requirement.tolerance_max) {
            (Some(min), Some(max)) => (min, max),
            _ => return Ok(None),
        };

        let width = max - min;
        if width <= 0.0 {
            return Err(EngineError::Validation(format!(
                "监测要求 {} 容差窗口宽度非正: [{}, {}]",
                requirement.requirement_id, min, max
            )));
        }

        let target = requirement.target_value.ok_or_else(|| {
            EngineError::Validation(format!(
                "监测要求 {} 配置了双侧限值但缺失目标值,无法计算偏差百分比",
                requirement.requirement_id
            ))
        })?;

        Ok(Some((value - target).abs() / width * 100.0))
    }
}

impl Default for DeviationClassifier {
    fn default() -> Self {
        Self::new()
    }
}
