//! 约束残差计算
//!
//! 纯函数：(约束, 实体快照) → 有符号残差，0 表示满足。
//! 所有计算都在 XY 平面内进行。

use crate::constraint::{Constraint, ConstraintKind};
use crate::entity::{Entity, EntityGeometry, EntityId};
use crate::geometry::{cross, distance};
use crate::math::{normalize_angle, to_plan, Point2, Vector2};
use std::collections::BTreeMap;

/// 计算约束残差
///
/// 参与实体缺失、数量不符或类型不支持时返回 `None`，求解器将其视为未满足。
pub fn evaluate(constraint: &Constraint, entities: &BTreeMap<EntityId, Entity>) -> Option<f64> {
    if !constraint.is_valid() {
        return None;
    }

    let ids = &constraint.entity_ids;
    let geometry = |index: usize| lookup(entities, ids[index]);

    match &constraint.kind {
        ConstraintKind::Distance { distance: target } => {
            if ids.len() == 1 {
                let seg = geometry(0)?.as_segment()?;
                return Some(seg.length() - target);
            }
            measure_distance(geometry(0)?, geometry(1)?).map(|d| d - target)
        }
        ConstraintKind::Parallel => {
            let u1 = line_direction(geometry(0)?)?;
            let u2 = line_direction(geometry(1)?)?;
            Some(cross(&u1, &u2).abs())
        }
        ConstraintKind::Perpendicular => {
            let u1 = line_direction(geometry(0)?)?;
            let u2 = line_direction(geometry(1)?)?;
            Some(u1.dot(&u2))
        }
        ConstraintKind::Coincident => coincidence(geometry(0)?, geometry(1)?),
        ConstraintKind::Fixed { anchors } => {
            let points = geometry(0)?.control_points();
            if points.len() != anchors.len() {
                return None;
            }
            Some(
                points
                    .iter()
                    .zip(anchors)
                    .map(|(p, a)| (p - a).norm())
                    .sum(),
            )
        }
        ConstraintKind::Angle { degrees } => {
            let s1 = geometry(0)?.as_segment()?;
            let s2 = geometry(1)?.as_segment()?;
            s1.direction()?;
            s2.direction()?;
            Some(normalize_angle(s2.angle() - s1.angle() - degrees.to_radians()))
        }
    }
}

fn lookup(entities: &BTreeMap<EntityId, Entity>, id: EntityId) -> Option<&EntityGeometry> {
    entities.get(&id).map(|e| &e.geometry)
}

/// 点的平面位置
pub(crate) fn point_position(geometry: &EntityGeometry) -> Option<Point2> {
    match geometry {
        EntityGeometry::Point { position } => Some(to_plan(position)),
        _ => None,
    }
}

/// 直线的单位方向，退化直线返回 None
pub(crate) fn line_direction(geometry: &EntityGeometry) -> Option<Vector2> {
    geometry.as_segment()?.direction()
}

/// 点-点距离，或点到直线（无限延长）的距离
fn measure_distance(a: &EntityGeometry, b: &EntityGeometry) -> Option<f64> {
    match (a, b) {
        (EntityGeometry::Point { .. }, EntityGeometry::Point { .. }) => {
            Some(distance(&point_position(a)?, &point_position(b)?))
        }
        (EntityGeometry::Point { .. }, EntityGeometry::Line { .. }) => {
            Some(b.as_segment()?.distance_to_line(&point_position(a)?))
        }
        (EntityGeometry::Line { .. }, EntityGeometry::Point { .. }) => {
            Some(a.as_segment()?.distance_to_line(&point_position(b)?))
        }
        _ => None,
    }
}

/// 重合：点-点、点在直线上、点在圆心上
fn coincidence(a: &EntityGeometry, b: &EntityGeometry) -> Option<f64> {
    let (point, other) = match (a, b) {
        (EntityGeometry::Point { .. }, _) => (point_position(a)?, b),
        (_, EntityGeometry::Point { .. }) => (point_position(b)?, a),
        _ => return None,
    };

    match other {
        EntityGeometry::Point { position } => Some(distance(&point, &to_plan(position))),
        EntityGeometry::Line { .. } => Some(other.as_segment()?.distance_to_line(&point)),
        EntityGeometry::Arc { center, .. } | EntityGeometry::Circle { center, .. } => {
            Some(distance(&point, &to_plan(center)))
        }
    }
}
