//! 约束定义
//!
//! 约束描述实体之间的几何关系，求解器据此调整实体坐标。
//!
//! 支持的约束类型：
//! - 距离：两点距离、点到直线距离、单条直线长度
//! - 平行 / 垂直：两条直线
//! - 重合：点与点、点与直线、点与圆心
//! - 固定：实体控制点锁定在锚点
//! - 角度：两条直线的有向夹角（度）

use crate::entity::EntityId;
use crate::math::Point3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 约束ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConstraintId(pub u64);

impl ConstraintId {
    /// 尚未由存储分配的ID
    pub fn null() -> Self {
        Self(0)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "constraint#{}", self.0)
    }
}

/// 约束类型及其参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConstraintKind {
    /// 距离约束
    Distance { distance: f64 },

    /// 平行约束
    Parallel,

    /// 垂直约束（两条线）
    Perpendicular,

    /// 共点约束
    Coincident,

    /// 固定约束，锚点为空时由存储在创建时捕获
    Fixed { anchors: Vec<Point3> },

    /// 角度约束（度）
    Angle { degrees: f64 },
}

impl ConstraintKind {
    pub fn name(&self) -> &'static str {
        match self {
            ConstraintKind::Distance { .. } => "distance",
            ConstraintKind::Parallel => "parallel",
            ConstraintKind::Perpendicular => "perpendicular",
            ConstraintKind::Coincident => "coincident",
            ConstraintKind::Fixed { .. } => "fixed",
            ConstraintKind::Angle { .. } => "angle",
        }
    }

    /// 允许的参与实体数量
    pub fn arity(&self) -> (usize, usize) {
        match self {
            ConstraintKind::Distance { .. } => (1, 2),
            ConstraintKind::Fixed { .. } => (1, 1),
            ConstraintKind::Parallel
            | ConstraintKind::Perpendicular
            | ConstraintKind::Coincident
            | ConstraintKind::Angle { .. } => (2, 2),
        }
    }

    pub fn accepts_arity(&self, count: usize) -> bool {
        let (min, max) = self.arity();
        (min..=max).contains(&count)
    }
}

/// 约束定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// 约束ID
    pub id: ConstraintId,

    /// 约束类型
    pub kind: ConstraintKind,

    /// 参与的实体
    pub entity_ids: Vec<EntityId>,

    /// 求解顺序：数值大的先处理
    pub priority: i32,

    /// 是否启用
    pub enabled: bool,

    /// 上次求解后是否满足
    pub satisfied: bool,

    /// 上次求解后的残差
    pub violation: f64,

    /// 约束名称
    pub name: String,
}

impl Constraint {
    /// 创建新约束（ID 由存储分配）
    pub fn new(kind: ConstraintKind, entity_ids: Vec<EntityId>) -> Self {
        Self {
            id: ConstraintId::null(),
            kind,
            entity_ids,
            priority: 0,
            enabled: true,
            satisfied: false,
            violation: 0.0,
            name: String::new(),
        }
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 设置名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 启用/禁用约束
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// 检查参与实体数量是否匹配约束类型
    pub fn is_valid(&self) -> bool {
        self.kind.accepts_arity(self.entity_ids.len())
    }
}

/// 约束补丁
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintPatch {
    pub kind: Option<ConstraintKind>,
    pub entity_ids: Option<Vec<EntityId>>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub name: Option<String>,
}

impl ConstraintPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 合并到约束上
    pub fn apply(&self, constraint: &mut Constraint) {
        if let Some(kind) = &self.kind {
            constraint.kind = kind.clone();
        }
        if let Some(ids) = &self.entity_ids {
            constraint.entity_ids = ids.clone();
        }
        if let Some(priority) = self.priority {
            constraint.priority = priority;
        }
        if let Some(enabled) = self.enabled {
            constraint.enabled = enabled;
        }
        if let Some(name) = &self.name {
            constraint.name = name.clone();
        }
    }
}

/// 预定义约束构造器
pub mod constraints {
    use super::*;

    /// 两点（或点与直线）之间的距离
    pub fn distance(a: EntityId, b: EntityId, distance: f64) -> Constraint {
        Constraint::new(ConstraintKind::Distance { distance }, vec![a, b]).with_name("Distance")
    }

    /// 单条直线的长度
    pub fn length(line: EntityId, length: f64) -> Constraint {
        Constraint::new(ConstraintKind::Distance { distance: length }, vec![line])
            .with_name("Length")
    }

    /// 创建平行约束
    pub fn parallel(a: EntityId, b: EntityId) -> Constraint {
        Constraint::new(ConstraintKind::Parallel, vec![a, b]).with_name("Parallel")
    }

    /// 创建垂直约束（两条线）
    pub fn perpendicular(a: EntityId, b: EntityId) -> Constraint {
        Constraint::new(ConstraintKind::Perpendicular, vec![a, b]).with_name("Perpendicular")
    }

    /// 创建共点约束
    pub fn coincident(a: EntityId, b: EntityId) -> Constraint {
        Constraint::new(ConstraintKind::Coincident, vec![a, b]).with_name("Coincident")
    }

    /// 固定在当前位置（锚点由存储捕获）
    pub fn fixed(entity: EntityId) -> Constraint {
        Constraint::new(ConstraintKind::Fixed { anchors: Vec::new() }, vec![entity])
            .with_name("Fixed")
    }

    /// 创建角度约束
    pub fn angle(a: EntityId, b: EntityId, degrees: f64) -> Constraint {
        Constraint::new(ConstraintKind::Angle { degrees }, vec![a, b]).with_name("Angle")
    }
}
