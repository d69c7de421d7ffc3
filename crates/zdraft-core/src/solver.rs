//! 约束求解器
//!
//! Gauss–Seidel 松弛：每轮按优先级依次处理未满足的约束，直接修改实体坐标，
//! 同一轮中前面约束的调整对后面的约束立即可见。
//!
//! 求解在单线程上运行，每隔 `yield_interval` 轮通过 `tokio::task::yield_now`
//! 让出执行权。

use crate::constraint::{Constraint, ConstraintId, ConstraintKind};
use crate::entity::{Entity, EntityGeometry, EntityId};
use crate::evaluator::{evaluate, point_position};
use crate::math::{from_plan, normalize_half_turn, to_plan, Point2, Vector2, Vector3, EPSILON};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::FRAC_PI_2;
use std::time::{Duration, Instant};

/// 求解器参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// 最大迭代次数
    pub max_iterations: usize,

    /// 收敛容差（所有约束残差绝对值之和）
    pub tolerance: f64,

    /// 时间上限
    pub time_limit: Duration,

    /// 每隔多少轮让出一次执行权（0 表示不让出）
    pub yield_interval: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
            time_limit: Duration::from_secs(2),
            yield_interval: 10,
        }
    }
}

/// 求解结果
///
/// `success` 表示没有内部错误，`converged` 表示达到了容差，两者相互独立。
#[derive(Debug, Clone, Serialize)]
pub struct SolveReport {
    pub success: bool,
    pub converged: bool,
    pub iterations: usize,
    pub violated_constraint_ids: Vec<ConstraintId>,
    /// 求解后的实体快照
    pub entities: Vec<Entity>,
    /// 求解后的约束快照（已写入 satisfied / violation）
    pub constraints: Vec<Constraint>,
    pub solve_time: Duration,
    pub config: SolverOptions,
    /// 失败原因
    pub error: Option<String>,
}

/// 迭代松弛求解器
#[derive(Debug, Clone, Default)]
pub struct RelaxationSolver {
    options: SolverOptions,
}

impl RelaxationSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// 执行约束求解
    ///
    /// 出现非有限坐标时恢复求解前的实体并报告 `success = false`。
    pub async fn solve(
        &self,
        entities: &mut BTreeMap<EntityId, Entity>,
        constraints: &mut BTreeMap<ConstraintId, Constraint>,
    ) -> SolveReport {
        let started = Instant::now();
        let tolerance = self.options.tolerance;
        let snapshot = entities.clone();

        // 优先级降序，其次按ID
        let mut order: Vec<&Constraint> = constraints.values().filter(|c| c.enabled).collect();
        order.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let pinned: BTreeSet<EntityId> = order
            .iter()
            .filter(|c| matches!(c.kind, ConstraintKind::Fixed { .. }))
            .flat_map(|c| c.entity_ids.iter().copied())
            .collect();

        let mut iterations = 0;
        let mut converged = false;
        let mut error = None;

        loop {
            let mut total = 0.0;
            let mut unresolved = false;
            for constraint in &order {
                match evaluate(constraint, entities) {
                    Some(v) => total += v.abs(),
                    None => unresolved = true,
                }
            }

            if total < tolerance {
                // 无法计算的约束（缺失实体等）不会因继续迭代而改善
                converged = !unresolved;
                break;
            }
            if iterations >= self.options.max_iterations {
                break;
            }
            if started.elapsed() >= self.options.time_limit {
                tracing::debug!("Solve time limit reached after {} iterations", iterations);
                break;
            }

            for constraint in &order {
                if let Some(residual) = evaluate(constraint, entities) {
                    if residual.abs() > tolerance {
                        adjust(constraint, residual, entities, &pinned);
                    }
                }
            }
            iterations += 1;

            if !entities.values().all(|e| e.geometry.is_finite()) {
                *entities = snapshot.clone();
                error = Some(format!("non-finite coordinate after iteration {}", iterations));
                break;
            }

            if self.options.yield_interval > 0 && iterations % self.options.yield_interval == 0 {
                tokio::task::yield_now().await;
            }
        }

        // 被移动过的实体更新修改时间
        for (id, entity) in entities.iter_mut() {
            if snapshot.get(id).map(|e| &e.geometry) != Some(&entity.geometry) {
                entity.touch();
            }
        }

        let mut violated = Vec::new();
        for constraint in constraints.values_mut() {
            match evaluate(constraint, entities) {
                Some(v) => {
                    constraint.violation = v;
                    constraint.satisfied = v.abs() <= tolerance;
                }
                None => {
                    constraint.violation = f64::INFINITY;
                    constraint.satisfied = false;
                }
            }
            if constraint.enabled && !constraint.satisfied {
                violated.push(constraint.id);
            }
        }

        tracing::debug!(
            "Relaxation finished: {} iterations, converged={}, {} violated",
            iterations,
            converged,
            violated.len()
        );

        SolveReport {
            success: error.is_none(),
            converged: converged && error.is_none(),
            iterations,
            violated_constraint_ids: violated,
            entities: entities.values().cloned().collect(),
            constraints: constraints.values().cloned().collect(),
            solve_time: started.elapsed(),
            config: self.options.clone(),
            error,
        }
    }
}

/// 按约束类型调整参与实体
fn adjust(
    constraint: &Constraint,
    residual: f64,
    entities: &mut BTreeMap<EntityId, Entity>,
    pinned: &BTreeSet<EntityId>,
) {
    let ids = &constraint.entity_ids;
    let mut adjuster = Adjuster { entities, pinned };

    match &constraint.kind {
        ConstraintKind::Distance { .. } if ids.len() == 1 => adjuster.line_length(ids[0], residual),
        ConstraintKind::Distance { .. } => adjuster.distance(ids[0], ids[1], residual),
        ConstraintKind::Coincident => adjuster.coincident(ids[0], ids[1]),
        ConstraintKind::Parallel => {
            if let Some(delta) = adjuster.angle_between(ids[0], ids[1]) {
                adjuster.rotate_pair(ids[0], ids[1], normalize_half_turn(delta));
            }
        }
        ConstraintKind::Perpendicular => {
            if let Some(delta) = adjuster.angle_between(ids[0], ids[1]) {
                adjuster.rotate_pair(ids[0], ids[1], normalize_half_turn(delta - FRAC_PI_2));
            }
        }
        // 角度残差本身就是需要消除的有向角
        ConstraintKind::Angle { .. } => adjuster.rotate_pair(ids[0], ids[1], residual),
        ConstraintKind::Fixed { anchors } => {
            if let Some(geometry) = adjuster.geometry_mut(ids[0]) {
                geometry.set_control_points(anchors);
            }
        }
    }
}

/// 对实体表的局部修改操作
struct Adjuster<'a> {
    entities: &'a mut BTreeMap<EntityId, Entity>,
    /// 被固定约束锁定的实体，其它约束不移动它们
    pinned: &'a BTreeSet<EntityId>,
}

impl Adjuster<'_> {
    fn movable(&self, id: EntityId) -> bool {
        !self.pinned.contains(&id)
    }

    fn geometry(&self, id: EntityId) -> Option<EntityGeometry> {
        self.entities.get(&id).map(|e| e.geometry.clone())
    }

    fn geometry_mut(&mut self, id: EntityId) -> Option<&mut EntityGeometry> {
        self.entities.get_mut(&id).map(|e| &mut e.geometry)
    }

    /// 设置点的平面位置，保留高程
    fn set_point(&mut self, id: EntityId, p: Point2) {
        if let Some(EntityGeometry::Point { position }) = self.geometry_mut(id) {
            *position = from_plan(&p, position.z);
        }
    }

    fn translate(&mut self, id: EntityId, offset: Vector2) {
        if let Some(geometry) = self.geometry_mut(id) {
            let shift = Vector3::new(offset.x, offset.y, 0.0);
            let moved: Vec<_> = geometry.control_points().iter().map(|p| p + shift).collect();
            geometry.set_control_points(&moved);
        }
    }

    /// 绕中点旋转直线
    fn rotate_line(&mut self, id: EntityId, delta: f64) {
        if let Some(EntityGeometry::Line { start, end }) = self.geometry_mut(id) {
            let mid = nalgebra::center(&to_plan(start), &to_plan(end));
            let (sin, cos) = delta.sin_cos();
            let rotate = |p: &Point2| {
                let v = p - mid;
                mid + Vector2::new(v.x * cos - v.y * sin, v.x * sin + v.y * cos)
            };
            let s = rotate(&to_plan(start));
            let e = rotate(&to_plan(end));
            *start = from_plan(&s, start.z);
            *end = from_plan(&e, end.z);
        }
    }

    /// 两条直线的方向角差 angle(b) - angle(a)
    fn angle_between(&self, a: EntityId, b: EntityId) -> Option<f64> {
        let s1 = self.geometry(a)?.as_segment()?;
        let s2 = self.geometry(b)?.as_segment()?;
        Some(s2.angle() - s1.angle())
    }

    /// 消除有向角误差：两条都可动时各转一半
    fn rotate_pair(&mut self, a: EntityId, b: EntityId, error: f64) {
        match (self.movable(a), self.movable(b)) {
            (true, true) => {
                self.rotate_line(a, error * 0.5);
                self.rotate_line(b, -error * 0.5);
            }
            (true, false) => self.rotate_line(a, error),
            (false, true) => self.rotate_line(b, -error),
            (false, false) => {}
        }
    }

    /// 以中点为中心缩放直线长度
    fn line_length(&mut self, id: EntityId, residual: f64) {
        if !self.movable(id) {
            return;
        }
        if let Some(EntityGeometry::Line { start, end }) = self.geometry_mut(id) {
            let (s, e) = (to_plan(start), to_plan(end));
            let v = e - s;
            let current = v.norm();
            let target = current - residual;
            let dir = if current > EPSILON {
                v / current
            } else {
                Vector2::new(1.0, 0.0)
            };
            let mid = nalgebra::center(&s, &e);
            let half = dir * (target * 0.5);
            *start = from_plan(&(mid - half), start.z);
            *end = from_plan(&(mid + half), end.z);
        }
    }

    fn distance(&mut self, a: EntityId, b: EntityId, residual: f64) {
        let (Some(ga), Some(gb)) = (self.geometry(a), self.geometry(b)) else {
            return;
        };
        match (&ga, &gb) {
            (EntityGeometry::Point { .. }, EntityGeometry::Point { .. }) => {
                self.point_pair(a, b, &ga, &gb, residual)
            }
            (EntityGeometry::Point { .. }, EntityGeometry::Line { .. }) => {
                self.point_to_line(a, b, &ga, &gb, residual)
            }
            (EntityGeometry::Line { .. }, EntityGeometry::Point { .. }) => {
                self.point_to_line(b, a, &gb, &ga, residual)
            }
            _ => {}
        }
    }

    /// 两点沿连线对称移动各一半误差
    fn point_pair(
        &mut self,
        a: EntityId,
        b: EntityId,
        ga: &EntityGeometry,
        gb: &EntityGeometry,
        residual: f64,
    ) {
        let (Some(p1), Some(p2)) = (point_position(ga), point_position(gb)) else {
            return;
        };
        let d = p2 - p1;
        let current = d.norm();
        let target = current - residual;

        let (new1, new2) = if current > EPSILON {
            let shift = d / current * residual;
            match (self.movable(a), self.movable(b)) {
                (true, true) => (p1 + shift * 0.5, p2 - shift * 0.5),
                (true, false) => (p1 + shift, p2),
                (false, true) => (p1, p2 - shift),
                (false, false) => return,
            }
        } else if target > EPSILON {
            // 两点重合但目标距离非零，沿 X 轴分开
            let half = Vector2::new(target * 0.5, 0.0);
            match (self.movable(a), self.movable(b)) {
                (true, true) => (p1 - half, p2 + half),
                (true, false) => (p2 - half * 2.0, p2),
                (false, true) => (p1, p1 + half * 2.0),
                (false, false) => return,
            }
        } else {
            return;
        };

        self.set_point(a, new1);
        self.set_point(b, new2);
    }

    /// 沿直线法向移动点（点被固定时平移直线）
    fn point_to_line(
        &mut self,
        point: EntityId,
        line: EntityId,
        gp: &EntityGeometry,
        gl: &EntityGeometry,
        residual: f64,
    ) {
        let (Some(p), Some(seg)) = (point_position(gp), gl.as_segment()) else {
            return;
        };
        let Some(foot) = seg.project_onto_line(&p) else {
            return;
        };
        let offset = p - foot;
        let current = offset.norm();
        let dir = if current > EPSILON {
            offset / current
        } else {
            match seg.normal() {
                Some(n) => n,
                None => return,
            }
        };
        let target = current - residual;

        if self.movable(point) {
            self.set_point(point, foot + dir * target);
        } else if self.movable(line) {
            self.translate(line, dir * residual);
        }
    }

    fn coincident(&mut self, a: EntityId, b: EntityId) {
        let (Some(ga), Some(gb)) = (self.geometry(a), self.geometry(b)) else {
            return;
        };
        let (point, other, gp, go) = match (&ga, &gb) {
            (EntityGeometry::Point { .. }, _) => (a, b, &ga, &gb),
            (_, EntityGeometry::Point { .. }) => (b, a, &gb, &ga),
            _ => return,
        };

        match go {
            EntityGeometry::Point { .. } => {
                let residual = match (point_position(gp), point_position(go)) {
                    (Some(p1), Some(p2)) => (p2 - p1).norm(),
                    _ => return,
                };
                self.point_pair(point, other, gp, go, residual);
            }
            EntityGeometry::Line { .. } => {
                let residual = match (point_position(gp), go.as_segment()) {
                    (Some(p), Some(seg)) => seg.distance_to_line(&p),
                    _ => return,
                };
                self.point_to_line(point, other, gp, go, residual);
            }
            EntityGeometry::Arc { center, .. } | EntityGeometry::Circle { center, .. } => {
                let Some(p) = point_position(gp) else {
                    return;
                };
                let c = to_plan(center);
                if self.movable(point) {
                    self.set_point(point, c);
                } else if self.movable(other) {
                    self.translate(other, p - c);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::constraints;
    use crate::math::Point3;

    struct Fixture {
        entities: BTreeMap<EntityId, Entity>,
        constraints: BTreeMap<ConstraintId, Constraint>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                entities: BTreeMap::new(),
                constraints: BTreeMap::new(),
            }
        }

        fn add(&mut self, geometry: EntityGeometry) -> EntityId {
            let id = EntityId(self.entities.len() as u64 + 1);
            self.entities.insert(id, Entity::new(id, geometry));
            id
        }

        fn point(&mut self, x: f64, y: f64) -> EntityId {
            self.add(EntityGeometry::Point {
                position: Point3::new(x, y, 0.0),
            })
        }

        fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) -> EntityId {
            self.add(EntityGeometry::Line {
                start: Point3::new(x1, y1, 0.0),
                end: Point3::new(x2, y2, 0.0),
            })
        }

        fn constrain(&mut self, mut constraint: Constraint) -> ConstraintId {
            let id = ConstraintId(self.constraints.len() as u64 + 1);
            constraint.id = id;
            self.constraints.insert(id, constraint);
            id
        }

        async fn solve(&mut self) -> SolveReport {
            RelaxationSolver::default()
                .solve(&mut self.entities, &mut self.constraints)
                .await
        }

        fn position(&self, id: EntityId) -> Point2 {
            point_position(&self.entities[&id].geometry).unwrap()
        }

        fn segment(&self, id: EntityId) -> crate::geometry::Segment {
            self.entities[&id].geometry.as_segment().unwrap()
        }
    }

    #[tokio::test]
    async fn test_distance_between_points() {
        let mut f = Fixture::new();
        let a = f.point(0.0, 0.0);
        let b = f.point(3.0, 0.0);
        let c = f.constrain(constraints::distance(a, b, 2.0));

        let report = f.solve().await;
        assert!(report.success);
        assert!(report.converged);
        assert!(((f.position(b) - f.position(a)).norm() - 2.0).abs() < 1e-6);
        // 对称移动
        assert!((f.position(a).x - 0.5).abs() < 1e-6);
        assert!(f.constraints[&c].satisfied);
        assert!(report.violated_constraint_ids.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let mut f = Fixture::new();
        let a = f.point(0.0, 0.0);
        let b = f.point(3.0, 0.0);
        f.constrain(constraints::distance(a, b, 2.0));
        f.solve().await;

        let before = f.entities.clone();
        let report = f.solve().await;
        assert_eq!(report.iterations, 0);
        assert!(report.converged);
        assert_eq!(f.entities, before);
    }

    #[tokio::test]
    async fn test_satisfied_parallel_does_not_move() {
        let mut f = Fixture::new();
        let l1 = f.line(0.0, 0.0, 5.0, 0.0);
        let l2 = f.line(0.0, 2.0, 5.0, 2.0);
        let c = f.constrain(constraints::parallel(l1, l2));
        let before = f.entities.clone();

        let report = f.solve().await;
        assert_eq!(report.iterations, 0);
        assert!(f.constraints[&c].satisfied);
        assert!(f.constraints[&c].violation.abs() < 1e-12);
        assert_eq!(f.entities, before);
    }

    #[tokio::test]
    async fn test_parallel_perpendicular_angle() {
        let mut f = Fixture::new();
        let l1 = f.line(0.0, 0.0, 4.0, 0.0);
        let l2 = f.line(0.0, 1.0, 4.0, 2.0);
        let l3 = f.line(2.0, -1.0, 3.0, 3.0);
        let l4 = f.line(0.0, 0.0, 1.0, 0.2);
        f.constrain(constraints::parallel(l1, l2));
        f.constrain(constraints::perpendicular(l1, l3));
        f.constrain(constraints::angle(l1, l4, 30.0));

        let report = f.solve().await;
        assert!(report.converged, "{:?}", report.violated_constraint_ids);

        let u1 = f.segment(l1).direction().unwrap();
        let u2 = f.segment(l2).direction().unwrap();
        let u3 = f.segment(l3).direction().unwrap();
        assert!(crate::geometry::cross(&u1, &u2).abs() < 1e-6);
        assert!(u1.dot(&u3).abs() < 1e-6);
        let angle = f.segment(l4).angle() - f.segment(l1).angle();
        assert!((angle - 30f64.to_radians()).abs() < 1e-6);
        // 旋转不改变长度
        assert!((f.segment(l2).length() - 17f64.sqrt()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fixed_entity_does_not_move() {
        let mut f = Fixture::new();
        let a = f.point(0.0, 0.0);
        let b = f.point(3.0, 0.0);
        let mut fixed = constraints::fixed(a);
        fixed.kind = ConstraintKind::Fixed {
            anchors: vec![Point3::new(0.0, 0.0, 0.0)],
        };
        f.constrain(fixed);
        f.constrain(constraints::distance(a, b, 2.0));

        let report = f.solve().await;
        assert!(report.converged);
        assert!(f.position(a).coords.norm() < 1e-12);
        assert!((f.position(b).x - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_coincident_point_on_line() {
        let mut f = Fixture::new();
        let p = f.point(1.0, 3.0);
        let l = f.line(0.0, 0.0, 5.0, 0.0);
        f.constrain(constraints::coincident(p, l));

        let report = f.solve().await;
        assert!(report.converged);
        assert!(f.position(p).y.abs() < 1e-9);
        assert!((f.position(p).x - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_line_length() {
        let mut f = Fixture::new();
        let l = f.line(0.0, 0.0, 4.0, 0.0);
        f.constrain(constraints::length(l, 6.0));

        let report = f.solve().await;
        assert!(report.converged);
        let seg = f.segment(l);
        assert!((seg.length() - 6.0).abs() < 1e-9);
        assert!((seg.midpoint().x - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_conflicting_constraints_do_not_converge() {
        let mut f = Fixture::new();
        let a = f.point(0.0, 0.0);
        let b = f.point(3.0, 0.0);
        let c1 = f.constrain(constraints::distance(a, b, 1.0));
        f.constrain(constraints::distance(a, b, 2.0));

        let report = f.solve().await;
        assert!(report.success);
        assert!(!report.converged);
        assert_eq!(report.iterations, 100);
        // 最后一轮由第二个约束收尾，第一个仍未满足
        assert!(report.violated_constraint_ids.contains(&c1));
    }

    #[tokio::test]
    async fn test_orphaned_constraint_is_violated() {
        let mut f = Fixture::new();
        let a = f.point(0.0, 0.0);
        let c = f.constrain(constraints::distance(a, EntityId(99), 1.0));

        let report = f.solve().await;
        assert!(report.success);
        assert!(!report.converged);
        assert_eq!(report.iterations, 0);
        assert_eq!(report.violated_constraint_ids, vec![c]);
    }

    #[tokio::test]
    async fn test_disabled_constraints_are_ignored() {
        let mut f = Fixture::new();
        let a = f.point(0.0, 0.0);
        let b = f.point(3.0, 0.0);
        let mut c = constraints::distance(a, b, 2.0);
        c.set_enabled(false);
        f.constrain(c);

        let report = f.solve().await;
        assert!(report.converged);
        assert_eq!(report.iterations, 0);
        assert!((f.position(b).x - 3.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_non_finite_restores_snapshot() {
        let mut f = Fixture::new();
        let a = f.point(0.0, 0.0);
        let b = f.point(f64::NAN, 0.0);
        f.constrain(constraints::distance(a, b, 1.0));

        let report = f.solve().await;
        assert!(!report.success);
        assert!(!report.converged);
        assert!(report.error.is_some());
        assert!(f.position(a).coords.norm() < 1e-12);
    }

    #[tokio::test]
    async fn test_time_limit() {
        let mut f = Fixture::new();
        let a = f.point(0.0, 0.0);
        let b = f.point(3.0, 0.0);
        f.constrain(constraints::distance(a, b, 2.0));

        let solver = RelaxationSolver::new(SolverOptions {
            time_limit: Duration::ZERO,
            ..SolverOptions::default()
        });
        let report = solver.solve(&mut f.entities, &mut f.constraints).await;
        assert_eq!(report.iterations, 0);
        assert!(!report.converged);
    }
}
