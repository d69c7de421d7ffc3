//! ZDraft 核心引擎
//!
//! 2D 墙体绘制、对象捕捉和参数化约束求解。
//!
//! # 架构设计
//!
//! - `WallDrawer`: 墙体绘制状态机，拥有墙体集合和捕捉索引
//! - `ConstraintStore`: 约束实体与约束，求解入口
//! - `UpdateScheduler`: 批量应用外部修改，每批只求解一次
//! - `EventBus`: 单线程事件分发
//!
//! 以上部件由 `DraftingEngine` 组装。
//!
//! # 示例
//!
//! ```rust
//! use zdraft_core::prelude::*;
//!
//! let mut engine = DraftingEngine::new(EngineConfig::default());
//!
//! // 画一面墙
//! let drawer = engine.drawer_mut();
//! drawer.start_drawing(Point2::new(0.0, 0.0));
//! drawer.finish_wall_segment(Some(Point2::new(4.0, 0.0))).unwrap();
//!
//! println!("Walls: {}", engine.drawer().wall_count());
//! ```

pub mod config;
pub mod constraint;
pub mod drawing;
pub mod engine;
pub mod entity;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod geometry;
pub mod math;
pub mod scheduler;
pub mod snap;
pub mod solver;
pub mod store;
pub mod wall;

pub use error::CoreError;

pub mod prelude {
    //! 常用类型的便捷导入
    pub use crate::config::EngineConfig;
    pub use crate::constraint::{constraints, Constraint, ConstraintId, ConstraintKind, ConstraintPatch};
    pub use crate::drawing::{DrawingState, KeyModifiers, OpeningSpec, SegmentOutcome, WallDrawer, WallPatch};
    pub use crate::engine::DraftingEngine;
    pub use crate::entity::{Entity, EntityGeometry, EntityId, EntityKind, EntityPatch};
    pub use crate::error::CoreError;
    pub use crate::events::{Event, EventBus, Subscription};
    pub use crate::geometry::Segment;
    pub use crate::math::{Point2, Point3, Vector2, Vector3};
    pub use crate::scheduler::{BatchReport, UpdateScheduler};
    pub use crate::snap::{SnapConfig, SnapContext, SnapMask, SnapPoint, SnapType};
    pub use crate::solver::{RelaxationSolver, SolveReport, SolverOptions};
    pub use crate::store::{ConstraintStore, ValidationIssue, ValidationReport};
    pub use crate::wall::{Opening, OpeningKind, WallConfig, WallId, WallSegment, WallType};
}
