//! 约束实体存储
//!
//! 拥有全部约束实体和约束，提供增删改查、孤立约束检查和求解入口。
//! 删除实体不会级联删除引用它的约束，由 [`ConstraintStore::validate`] 报告。

use crate::constraint::{Constraint, ConstraintId, ConstraintKind, ConstraintPatch};
use crate::entity::{Entity, EntityGeometry, EntityId, EntityPatch};
use crate::error::CoreError;
use crate::events::{Event, EventBus};
use crate::solver::{RelaxationSolver, SolveReport, SolverOptions};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// 校验问题
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ValidationIssue {
    /// 约束引用了不存在的实体
    OrphanedConstraint {
        constraint: ConstraintId,
        missing: EntityId,
    },
    /// 参与实体数量与约束类型不符
    WrongArity {
        constraint: ConstraintId,
        expected: (usize, usize),
        actual: usize,
    },
}

/// 校验报告（仅供参考，不会阻止其它操作）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

/// 求解统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct SolveStats {
    /// 总求解次数
    pub solve_count: u64,

    /// 无内部错误的次数
    pub success_count: u64,

    /// 收敛次数
    pub converged_count: u64,

    /// 平均迭代次数
    pub avg_iterations: f64,

    /// 最后一次求解耗时
    pub last_solve_time: Option<Duration>,

    /// 最后一次求解的时间
    pub last_solved_at: Option<DateTime<Utc>>,
}

impl SolveStats {
    fn record(&mut self, report: &SolveReport) {
        let n = self.solve_count as f64;
        self.avg_iterations = (self.avg_iterations * n + report.iterations as f64) / (n + 1.0);
        self.solve_count += 1;
        if report.success {
            self.success_count += 1;
        }
        if report.converged {
            self.converged_count += 1;
        }
        self.last_solve_time = Some(report.solve_time);
        self.last_solved_at = Some(Utc::now());
    }
}

/// 约束实体存储
#[derive(Debug)]
pub struct ConstraintStore {
    entities: BTreeMap<EntityId, Entity>,
    constraints: BTreeMap<ConstraintId, Constraint>,

    /// 实体到约束的映射（哪些约束作用于这个实体）
    entity_constraints: BTreeMap<EntityId, BTreeSet<ConstraintId>>,

    next_entity_id: u64,
    next_constraint_id: u64,

    stats: SolveStats,
    bus: EventBus,
}

impl ConstraintStore {
    pub fn new(bus: EventBus) -> Self {
        Self {
            entities: BTreeMap::new(),
            constraints: BTreeMap::new(),
            entity_constraints: BTreeMap::new(),
            next_entity_id: 1,
            next_constraint_id: 1,
            stats: SolveStats::default(),
            bus,
        }
    }

    // === 实体管理 ===

    /// 创建实体，返回存储记录的副本
    pub fn create_entity(&mut self, geometry: EntityGeometry) -> Entity {
        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;

        let entity = Entity::new(id, geometry);
        self.entities.insert(id, entity.clone());

        tracing::debug!("Entity {} created ({})", id, entity.kind().name());
        self.bus.emit(Event::EntityCreated {
            entity: entity.clone(),
        });
        entity
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// 所有实体（按ID排序）
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// 合并补丁并更新修改时间
    pub fn update_entity(&mut self, id: EntityId, patch: &EntityPatch) -> Result<Entity, CoreError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(CoreError::EntityNotFound(id))?;

        entity.geometry = patch.apply(&entity.geometry)?;
        entity.touch();
        let entity = entity.clone();

        self.bus.emit(Event::EntityUpdated {
            entity: entity.clone(),
        });
        Ok(entity)
    }

    /// 删除实体（不级联删除约束）
    pub fn delete_entity(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.entities.remove(&id) else {
            return false;
        };

        if let Some(dependents) = self.entity_constraints.get(&id) {
            if !dependents.is_empty() {
                tracing::debug!(
                    "Entity {} deleted while referenced by {} constraints",
                    id,
                    dependents.len()
                );
            }
        }

        self.bus.emit(Event::EntityDeleted { entity });
        true
    }

    // === 约束管理 ===

    /// 按类型和参与实体创建约束
    pub fn create_constraint(&mut self, kind: ConstraintKind, entity_ids: Vec<EntityId>) -> Constraint {
        let name = kind.name().to_string();
        self.add_constraint(Constraint::new(kind, entity_ids).with_name(name))
    }

    /// 添加预先构造的约束（见 [`crate::constraint::constraints`]），分配新ID
    ///
    /// 锚点为空的固定约束在此时捕获实体当前的控制点。
    pub fn add_constraint(&mut self, mut constraint: Constraint) -> Constraint {
        constraint.id = ConstraintId(self.next_constraint_id);
        self.next_constraint_id += 1;
        self.capture_anchors(&mut constraint);

        self.index(&constraint);
        self.constraints.insert(constraint.id, constraint.clone());

        tracing::debug!(
            "Constraint {} created ({} on {:?})",
            constraint.id,
            constraint.kind.name(),
            constraint.entity_ids
        );
        self.bus.emit(Event::ConstraintCreated {
            constraint: constraint.clone(),
        });
        constraint
    }

    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.get(&id)
    }

    /// 所有约束（按ID排序）
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.values()
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    /// 获取作用于实体的约束
    pub fn constraints_for(&self, entity: EntityId) -> Vec<&Constraint> {
        self.entity_constraints
            .get(&entity)
            .map(|ids| ids.iter().filter_map(|id| self.constraints.get(id)).collect())
            .unwrap_or_default()
    }

    /// 合并约束补丁
    pub fn update_constraint(
        &mut self,
        id: ConstraintId,
        patch: &ConstraintPatch,
    ) -> Result<Constraint, CoreError> {
        let mut constraint = self
            .constraints
            .get(&id)
            .cloned()
            .ok_or(CoreError::ConstraintNotFound(id))?;

        self.unindex(&constraint);
        patch.apply(&mut constraint);
        self.capture_anchors(&mut constraint);
        self.index(&constraint);
        self.constraints.insert(id, constraint.clone());

        self.bus.emit(Event::ConstraintUpdated {
            constraint: constraint.clone(),
        });
        Ok(constraint)
    }

    pub fn delete_constraint(&mut self, id: ConstraintId) -> bool {
        let Some(constraint) = self.constraints.remove(&id) else {
            return false;
        };
        self.unindex(&constraint);

        self.bus.emit(Event::ConstraintDeleted { constraint });
        true
    }

    fn capture_anchors(&self, constraint: &mut Constraint) {
        if let ConstraintKind::Fixed { anchors } = &mut constraint.kind {
            if anchors.is_empty() {
                if let Some(entity) = constraint
                    .entity_ids
                    .first()
                    .and_then(|id| self.entities.get(id))
                {
                    *anchors = entity.geometry.control_points();
                }
            }
        }
    }

    fn index(&mut self, constraint: &Constraint) {
        for entity in &constraint.entity_ids {
            self.entity_constraints
                .entry(*entity)
                .or_default()
                .insert(constraint.id);
        }
    }

    fn unindex(&mut self, constraint: &Constraint) {
        for entity in &constraint.entity_ids {
            if let Some(ids) = self.entity_constraints.get_mut(entity) {
                ids.remove(&constraint.id);
                if ids.is_empty() {
                    self.entity_constraints.remove(entity);
                }
            }
        }
    }

    // === 校验与求解 ===

    /// 检查孤立约束和参与实体数量
    pub fn validate(&self) -> ValidationReport {
        let mut issues = Vec::new();

        for constraint in self.constraints.values() {
            if !constraint.is_valid() {
                issues.push(ValidationIssue::WrongArity {
                    constraint: constraint.id,
                    expected: constraint.kind.arity(),
                    actual: constraint.entity_ids.len(),
                });
            }
            for entity in &constraint.entity_ids {
                if !self.entities.contains_key(entity) {
                    tracing::warn!(
                        "Constraint {} references missing entity {}",
                        constraint.id,
                        entity
                    );
                    issues.push(ValidationIssue::OrphanedConstraint {
                        constraint: constraint.id,
                        missing: *entity,
                    });
                }
            }
        }

        ValidationReport {
            valid: issues.is_empty(),
            issues,
        }
    }

    /// 求解全部约束
    pub async fn solve(&mut self, options: &SolverOptions) -> SolveReport {
        let solver = RelaxationSolver::new(options.clone());
        let report = solver.solve(&mut self.entities, &mut self.constraints).await;
        self.stats.record(&report);

        if report.converged {
            tracing::info!(
                "Constraints solved in {} iterations ({:?})",
                report.iterations,
                report.solve_time
            );
        } else if let Some(error) = &report.error {
            tracing::warn!("Constraint solve failed: {}", error);
            self.bus.emit(Event::Error {
                message: format!("constraint solve failed: {}", error),
            });
        } else {
            tracing::warn!(
                "Constraints did not converge after {} iterations, {} violated",
                report.iterations,
                report.violated_constraint_ids.len()
            );
        }

        self.bus.emit(Event::ConstraintsSolved {
            converged: report.converged,
            iterations: report.iterations,
            violated: report.violated_constraint_ids.clone(),
        });
        report
    }

    /// 获取求解统计
    pub fn stats(&self) -> &SolveStats {
        &self.stats
    }

    /// 重置统计
    pub fn reset_stats(&mut self) {
        self.stats = SolveStats::default();
    }

    /// 整体替换（导入用），不发事件
    ///
    /// 孤立约束原样保留。新实体ID同时越过约束引用过的ID，
    /// 已删除实体的ID不会被复用。
    pub fn replace_all(&mut self, entities: Vec<Entity>, constraints: Vec<Constraint>) {
        self.entities = entities.into_iter().map(|e| (e.id, e)).collect();
        self.constraints = constraints.into_iter().map(|c| (c.id, c)).collect();

        self.entity_constraints.clear();
        let all: Vec<Constraint> = self.constraints.values().cloned().collect();
        for constraint in &all {
            self.index(constraint);
        }

        let highest_entity = self
            .entities
            .keys()
            .chain(self.entity_constraints.keys())
            .map(|id| id.0)
            .max()
            .unwrap_or(0);
        self.next_entity_id = highest_entity + 1;
        self.next_constraint_id = self.constraints.keys().map(|id| id.0).max().unwrap_or(0) + 1;
    }

    /// 清空
    pub fn clear(&mut self) {
        self.replace_all(Vec::new(), Vec::new());
        self.reset_stats();
    }
}
