//! 批量更新调度
//!
//! 外部修改先进入队列，[`UpdateScheduler::process_updates`] 一次性应用
//! 队列快照并只求解一次。队列句柄可以克隆，求解挂起期间仍可继续入队，
//! 这些更新留到下一批处理。

use crate::constraint::{ConstraintId, ConstraintPatch};
use crate::entity::{EntityId, EntityPatch};
use crate::error::CoreError;
use crate::solver::{SolveReport, SolverOptions};
use crate::store::ConstraintStore;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// 待处理的修改
#[derive(Debug, Clone, PartialEq)]
pub enum PendingUpdate {
    Entity { id: EntityId, patch: EntityPatch },
    Constraint { id: ConstraintId, patch: ConstraintPatch },
}

/// 更新队列句柄（克隆共享同一队列）
#[derive(Debug, Clone, Default)]
pub struct UpdateQueue {
    items: Rc<RefCell<VecDeque<PendingUpdate>>>,
    processing: Rc<Cell<bool>>,
}

impl UpdateQueue {
    pub fn queue_entity(&self, id: EntityId, patch: EntityPatch) {
        self.items
            .borrow_mut()
            .push_back(PendingUpdate::Entity { id, patch });
    }

    pub fn queue_constraint(&self, id: ConstraintId, patch: ConstraintPatch) {
        self.items
            .borrow_mut()
            .push_back(PendingUpdate::Constraint { id, patch });
    }

    /// 队列中的更新数量
    pub fn pending(&self) -> usize {
        self.items.borrow().len()
    }

    /// 是否正在处理一批更新
    pub fn is_processing(&self) -> bool {
        self.processing.get()
    }

    /// 丢弃所有待处理更新
    pub fn clear(&self) {
        self.items.borrow_mut().clear();
    }

    fn take_snapshot(&self) -> Vec<PendingUpdate> {
        self.items.borrow_mut().drain(..).collect()
    }
}

/// 一批更新的处理结果
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// 成功应用的数量
    pub applied: usize,

    /// 应用失败的更新及原因
    pub failed: Vec<(PendingUpdate, CoreError)>,

    /// 本批次的求解结果
    pub solve: SolveReport,
}

/// 处理标志守卫，离开作用域（包括 future 被丢弃）时复位
struct ProcessingGuard(Rc<Cell<bool>>);

impl ProcessingGuard {
    fn acquire(flag: &Rc<Cell<bool>>) -> Option<Self> {
        if flag.replace(true) {
            return None;
        }
        Some(Self(flag.clone()))
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// 更新调度器
#[derive(Debug, Clone, Default)]
pub struct UpdateScheduler {
    queue: UpdateQueue,
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取队列句柄
    pub fn queue(&self) -> UpdateQueue {
        self.queue.clone()
    }

    pub fn queue_entity(&self, id: EntityId, patch: EntityPatch) {
        self.queue.queue_entity(id, patch);
    }

    pub fn queue_constraint(&self, id: ConstraintId, patch: ConstraintPatch) {
        self.queue.queue_constraint(id, patch);
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub fn is_processing(&self) -> bool {
        self.queue.is_processing()
    }

    /// 应用队列快照并求解一次
    ///
    /// 队列为空或已有批次在处理时返回 `None`，不会求解。
    pub async fn process_updates(
        &self,
        store: &mut ConstraintStore,
        options: &SolverOptions,
    ) -> Option<BatchReport> {
        if self.queue.pending() == 0 {
            return None;
        }
        let Some(_guard) = ProcessingGuard::acquire(&self.queue.processing) else {
            tracing::debug!("Update batch already in progress, skipping");
            return None;
        };

        let batch = self.queue.take_snapshot();
        let total = batch.len();
        let mut failed = Vec::new();

        for update in batch {
            let result = match &update {
                PendingUpdate::Entity { id, patch } => store.update_entity(*id, patch).map(|_| ()),
                PendingUpdate::Constraint { id, patch } => {
                    store.update_constraint(*id, patch).map(|_| ())
                }
            };
            if let Err(e) = result {
                tracing::warn!("Queued update failed: {}", e);
                failed.push((update, e));
            }
        }

        let applied = total - failed.len();
        tracing::debug!("Applied {} of {} queued updates", applied, total);

        let solve = store.solve(options).await;
        Some(BatchReport {
            applied,
            failed,
            solve,
        })
    }
}
