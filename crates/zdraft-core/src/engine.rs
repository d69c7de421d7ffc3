//! 绘图引擎
//!
//! 把事件总线、墙体绘制器、约束存储和更新调度器组装在一起。
//! 每个宿主持有自己的实例，没有全局单例。

use crate::config::EngineConfig;
use crate::constraint::Constraint;
use crate::drawing::WallDrawer;
use crate::entity::Entity;
use crate::events::{Event, EventBus, Subscription};
use crate::scheduler::{BatchReport, UpdateScheduler};
use crate::store::ConstraintStore;
use crate::wall::WallSegment;

/// 绘图引擎
#[derive(Debug)]
pub struct DraftingEngine {
    config: EngineConfig,
    bus: EventBus,
    drawer: WallDrawer,
    store: ConstraintStore,
    scheduler: UpdateScheduler,
}

impl DraftingEngine {
    pub fn new(config: EngineConfig) -> Self {
        let bus = EventBus::new();
        let drawer = WallDrawer::new(config.wall.clone(), config.snap.clone(), bus.clone());
        let store = ConstraintStore::new(bus.clone());

        tracing::debug!("Drafting engine created");

        Self {
            config,
            bus,
            drawer,
            store,
            scheduler: UpdateScheduler::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn drawer(&self) -> &WallDrawer {
        &self.drawer
    }

    pub fn drawer_mut(&mut self) -> &mut WallDrawer {
        &mut self.drawer
    }

    pub fn store(&self) -> &ConstraintStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConstraintStore {
        &mut self.store
    }

    /// 更新调度器（克隆句柄可在别处入队）
    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    /// 订阅引擎事件，需持续取走，见 [`EventBus::subscribe`]
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// 处理排队的更新并求解
    pub async fn process_updates(&mut self) -> Option<BatchReport> {
        self.scheduler
            .process_updates(&mut self.store, &self.config.solver)
            .await
    }

    /// 清空所有墙体、实体、约束和待处理更新
    pub fn reset(&mut self) {
        self.drawer.clear();
        self.store.clear();
        self.scheduler.queue().clear();

        tracing::info!("Drafting engine reset");
        self.bus.emit(Event::SystemReset);
    }

    /// 整体替换内容（导入用）
    pub fn replace_contents(
        &mut self,
        walls: Vec<WallSegment>,
        entities: Vec<Entity>,
        constraints: Vec<Constraint>,
    ) {
        self.drawer.replace_walls(walls);
        self.store.replace_all(entities, constraints);
        self.scheduler.queue().clear();
    }

    /// 释放引擎，所有订阅随之结束
    pub fn dispose(self) {
        tracing::debug!(
            "Drafting engine disposed ({} walls, {} entities)",
            self.drawer.wall_count(),
            self.store.entity_count()
        );
    }
}

impl Default for DraftingEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::constraints;
    use crate::drawing::{DrawingState, SegmentOutcome};
    use crate::entity::{EntityGeometry, EntityPatch};
    use crate::math::{Point2, Point3};
    use futures::StreamExt;

    fn point(x: f64, y: f64) -> EntityGeometry {
        EntityGeometry::Point {
            position: Point3::new(x, y, 0.0),
        }
    }

    fn line(x1: f64, y1: f64, x2: f64, y2: f64) -> EntityGeometry {
        EntityGeometry::Line {
            start: Point3::new(x1, y1, 0.0),
            end: Point3::new(x2, y2, 0.0),
        }
    }

    #[tokio::test]
    async fn test_distance_constraint_via_queue() {
        let mut engine = DraftingEngine::default();
        let a = engine.store_mut().create_entity(point(0.0, 0.0)).id;
        let b = engine.store_mut().create_entity(point(1.0, 0.0)).id;
        engine
            .store_mut()
            .add_constraint(constraints::distance(a, b, 2.0));

        engine
            .scheduler()
            .queue_entity(b, EntityPatch::position(Point3::new(3.0, 0.0, 0.0)));
        let report = engine.process_updates().await.unwrap();
        assert!(report.solve.converged);

        let pa = engine.store().entity(a).unwrap().geometry.control_points()[0];
        let pb = engine.store().entity(b).unwrap().geometry.control_points()[0];
        assert!(((pb - pa).norm() - 2.0).abs() < 1e-6);

        // 队列已空
        assert!(engine.process_updates().await.is_none());
    }

    #[tokio::test]
    async fn test_short_wall_is_rejected() {
        let mut engine = DraftingEngine::default();
        let drawer = engine.drawer_mut();
        drawer.start_drawing(Point2::new(0.0, 0.0));
        let outcome = drawer
            .finish_wall_segment(Some(Point2::new(0.0, 0.05)))
            .unwrap();

        assert!(matches!(outcome, SegmentOutcome::Rejected { .. }));
        assert_eq!(engine.drawer().wall_count(), 0);
        assert_eq!(engine.drawer().state(), DrawingState::Drawing);
    }

    #[tokio::test]
    async fn test_room_closure_event() {
        let mut engine = DraftingEngine::default();
        let mut sub = engine.subscribe();

        let drawer = engine.drawer_mut();
        drawer.start_drawing(Point2::new(0.0, 0.0));
        for (x, y) in [(4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)] {
            drawer.finish_wall_segment(Some(Point2::new(x, y))).unwrap();
        }

        let closed: Vec<_> = sub
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                Event::RoomClosed { wall_ids } => Some(wall_ids),
                _ => None,
            })
            .collect();
        // 闭合墙及其两端相接的墙
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].len(), 3);
    }

    #[tokio::test]
    async fn test_satisfied_parallel_is_untouched() {
        let mut engine = DraftingEngine::default();
        let l1 = engine.store_mut().create_entity(line(0.0, 0.0, 4.0, 0.0));
        let l2 = engine.store_mut().create_entity(line(0.0, 2.0, 4.0, 2.0));
        engine
            .store_mut()
            .add_constraint(constraints::parallel(l1.id, l2.id));

        let options = engine.config().solver.clone();
        let report = engine.store_mut().solve(&options).await;
        assert!(report.converged);
        assert_eq!(report.iterations, 0);
        assert_eq!(engine.store().entity(l1.id), Some(&l1));
        assert_eq!(engine.store().entity(l2.id), Some(&l2));
    }

    #[tokio::test]
    async fn test_reset_and_dispose() {
        let mut engine = DraftingEngine::default();
        let mut sub = engine.subscribe();

        engine
            .drawer_mut()
            .create_room(Point2::new(0.0, 0.0), 3.0, 3.0, None)
            .unwrap();
        let id = engine.store_mut().create_entity(point(1.0, 1.0)).id;
        engine
            .scheduler()
            .queue_entity(id, EntityPatch::position(Point3::origin()));

        engine.reset();
        assert_eq!(engine.drawer().wall_count(), 0);
        assert_eq!(engine.store().entity_count(), 0);
        assert_eq!(engine.scheduler().pending(), 0);
        assert!(matches!(sub.drain().last(), Some(Event::SystemReset)));

        engine.dispose();
        // 总线释放后订阅流结束
        assert!(sub.next().await.is_none());
    }
}
