//! 约束实体定义
//!
//! 参与参数化约束的几何对象：点、直线、圆弧、圆。

use crate::error::CoreError;
use crate::geometry::Segment;
use crate::math::{to_plan, Point3};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 实体ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// 实体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Point,
    Line,
    Arc,
    Circle,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Point => "point",
            EntityKind::Line => "line",
            EntityKind::Arc => "arc",
            EntityKind::Circle => "circle",
        }
    }
}

/// 实体几何数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntityGeometry {
    Point {
        position: Point3,
    },
    Line {
        start: Point3,
        end: Point3,
    },
    Arc {
        center: Point3,
        radius: f64,
        /// 起始角度（弧度）
        start_angle: f64,
        /// 终止角度（弧度）
        end_angle: f64,
    },
    Circle {
        center: Point3,
        radius: f64,
    },
}

impl EntityGeometry {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityGeometry::Point { .. } => EntityKind::Point,
            EntityGeometry::Line { .. } => EntityKind::Line,
            EntityGeometry::Arc { .. } => EntityKind::Arc,
            EntityGeometry::Circle { .. } => EntityKind::Circle,
        }
    }

    /// 求解器可移动的控制点
    ///
    /// 点：位置；直线：起点、终点；圆弧和圆：圆心。
    pub fn control_points(&self) -> Vec<Point3> {
        match self {
            EntityGeometry::Point { position } => vec![*position],
            EntityGeometry::Line { start, end } => vec![*start, *end],
            EntityGeometry::Arc { center, .. } | EntityGeometry::Circle { center, .. } => {
                vec![*center]
            }
        }
    }

    /// 按 [`control_points`](Self::control_points) 的顺序写回控制点，多余的忽略
    pub fn set_control_points(&mut self, points: &[Point3]) {
        match self {
            EntityGeometry::Point { position } => {
                if let Some(p) = points.first() {
                    *position = *p;
                }
            }
            EntityGeometry::Line { start, end } => {
                if let [s, e, ..] = points {
                    *start = *s;
                    *end = *e;
                }
            }
            EntityGeometry::Arc { center, .. } | EntityGeometry::Circle { center, .. } => {
                if let Some(p) = points.first() {
                    *center = *p;
                }
            }
        }
    }

    /// 直线的平面投影
    pub fn as_segment(&self) -> Option<Segment> {
        match self {
            EntityGeometry::Line { start, end } => Some(Segment::new(to_plan(start), to_plan(end))),
            _ => None,
        }
    }

    /// 所有坐标和尺寸是否为有限值
    pub fn is_finite(&self) -> bool {
        let scalars_ok = match self {
            EntityGeometry::Arc {
                radius,
                start_angle,
                end_angle,
                ..
            } => radius.is_finite() && start_angle.is_finite() && end_angle.is_finite(),
            EntityGeometry::Circle { radius, .. } => radius.is_finite(),
            _ => true,
        };
        scalars_ok
            && self
                .control_points()
                .iter()
                .all(|p| p.iter().all(|c| c.is_finite()))
    }
}

/// 约束实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub geometry: EntityGeometry,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Entity {
    pub fn new(id: EntityId, geometry: EntityGeometry) -> Self {
        let now = Utc::now();
        Self {
            id,
            geometry,
            created_at: now,
            last_modified: now,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.geometry.kind()
    }

    /// 更新修改时间
    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }
}

/// 实体补丁
///
/// 只合并给出的字段；不属于该实体类型的字段会被拒绝。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityPatch {
    pub position: Option<Point3>,
    pub start: Option<Point3>,
    pub end: Option<Point3>,
    pub center: Option<Point3>,
    pub radius: Option<f64>,
    pub start_angle: Option<f64>,
    pub end_angle: Option<f64>,
}

impl EntityPatch {
    pub fn position(position: Point3) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    pub fn endpoints(start: Point3, end: Point3) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 合并到几何数据上，返回新的几何数据（失败时原数据不变）
    pub fn apply(&self, geometry: &EntityGeometry) -> Result<EntityGeometry, CoreError> {
        let kind = geometry.kind();
        let reject = |field: &'static str| CoreError::InvalidPatch { field, kind };
        if let Some(r) = self.radius {
            positive("radius", r)?;
        }
        let mut merged = geometry.clone();

        match &mut merged {
            EntityGeometry::Point { position } => {
                if self.start.is_some() {
                    return Err(reject("start"));
                }
                if self.end.is_some() {
                    return Err(reject("end"));
                }
                if self.center.is_some() {
                    return Err(reject("center"));
                }
                if self.radius.is_some() {
                    return Err(reject("radius"));
                }
                if self.start_angle.is_some() {
                    return Err(reject("start_angle"));
                }
                if self.end_angle.is_some() {
                    return Err(reject("end_angle"));
                }
                if let Some(p) = self.position {
                    *position = p;
                }
            }
            EntityGeometry::Line { start, end } => {
                if self.position.is_some() {
                    return Err(reject("position"));
                }
                if self.center.is_some() {
                    return Err(reject("center"));
                }
                if self.radius.is_some() {
                    return Err(reject("radius"));
                }
                if self.start_angle.is_some() {
                    return Err(reject("start_angle"));
                }
                if self.end_angle.is_some() {
                    return Err(reject("end_angle"));
                }
                if let Some(p) = self.start {
                    *start = p;
                }
                if let Some(p) = self.end {
                    *end = p;
                }
            }
            EntityGeometry::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => {
                if self.position.is_some() {
                    return Err(reject("position"));
                }
                if self.start.is_some() {
                    return Err(reject("start"));
                }
                if self.end.is_some() {
                    return Err(reject("end"));
                }
                if let Some(p) = self.center {
                    *center = p;
                }
                if let Some(r) = self.radius {
                    *radius = r;
                }
                if let Some(a) = self.start_angle {
                    *start_angle = a;
                }
                if let Some(a) = self.end_angle {
                    *end_angle = a;
                }
            }
            EntityGeometry::Circle { center, radius } => {
                if self.position.is_some() {
                    return Err(reject("position"));
                }
                if self.start.is_some() {
                    return Err(reject("start"));
                }
                if self.end.is_some() {
                    return Err(reject("end"));
                }
                if self.start_angle.is_some() {
                    return Err(reject("start_angle"));
                }
                if self.end_angle.is_some() {
                    return Err(reject("end_angle"));
                }
                if let Some(p) = self.center {
                    *center = p;
                }
                if let Some(r) = self.radius {
                    *radius = r;
                }
            }
        }

        Ok(merged)
    }
}

/// 尺寸必须为正的有限值
pub(crate) fn positive(field: &'static str, value: f64) -> Result<f64, CoreError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(CoreError::InvalidDimension { field, value })
    }
}
