//! 事件总线
//!
//! 单线程的类型化消息分发：
//! - 每个订阅者拥有一条独立的无界通道
//! - 订阅返回 [`Subscription`]，丢弃即取消订阅
//! - 仅进程内投递，按发出顺序到达，不做持久化或重试

use crate::constraint::{Constraint, ConstraintId};
use crate::entity::Entity;
use crate::math::Point2;
use crate::snap::SnapPoint;
use crate::wall::{WallId, WallSegment};
use futures::channel::mpsc;
use futures::{FutureExt, Stream, StreamExt};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

/// 引擎发出的事件
#[derive(Debug, Clone)]
pub enum Event {
    /// 绘制开始
    DrawingStarted { point: Point2, snap: SnapPoint },
    /// 预览更新
    DrawingContinued { preview: WallSegment, snap: SnapPoint },
    /// 墙体提交
    WallCreated { wall: WallSegment, can_continue: bool },
    WallDeleted { wall: WallSegment },
    WallUpdated { wall: WallSegment },
    /// 检测到闭合房间
    RoomClosed { wall_ids: Vec<WallId> },
    /// 绘制结束
    DrawingFinished { walls_in_chain: usize },

    /// 约束实体操作
    EntityCreated { entity: Entity },
    EntityUpdated { entity: Entity },
    EntityDeleted { entity: Entity },

    /// 约束操作
    ConstraintCreated { constraint: Constraint },
    ConstraintUpdated { constraint: Constraint },
    ConstraintDeleted { constraint: Constraint },
    ConstraintsSolved {
        converged: bool,
        iterations: usize,
        violated: Vec<ConstraintId>,
    },

    /// 系统控制
    SystemReset,
    Error { message: String },
}

impl Event {
    /// 事件名称（与外部协议一致）
    pub fn name(&self) -> &'static str {
        match self {
            Event::DrawingStarted { .. } => "drawingStarted",
            Event::DrawingContinued { .. } => "drawingContinued",
            Event::WallCreated { .. } => "wallCreated",
            Event::WallDeleted { .. } => "wallDeleted",
            Event::WallUpdated { .. } => "wallUpdated",
            Event::RoomClosed { .. } => "roomClosed",
            Event::DrawingFinished { .. } => "drawingFinished",
            Event::EntityCreated { .. } => "entityCreated",
            Event::EntityUpdated { .. } => "entityUpdated",
            Event::EntityDeleted { .. } => "entityDeleted",
            Event::ConstraintCreated { .. } => "constraintCreated",
            Event::ConstraintUpdated { .. } => "constraintUpdated",
            Event::ConstraintDeleted { .. } => "constraintDeleted",
            Event::ConstraintsSolved { .. } => "constraintsSolved",
            Event::SystemReset => "systemReset",
            Event::Error { .. } => "error",
        }
    }
}

/// 订阅者ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

type Registry = RefCell<BTreeMap<SubscriberId, mpsc::UnboundedSender<Event>>>;

/// 事件总线
///
/// 克隆开销很低，所有克隆共享同一个订阅表。
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Rc<Registry>,
    next_id: Rc<Cell<u64>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅全部事件
    ///
    /// 通道没有容量上限，事件会一直缓存到被取走为止。
    /// 绘制时每次光标移动都会发出 `DrawingContinued`，持有订阅的一方
    /// 需要持续 [`Subscription::drain`]，不再关心时直接丢弃订阅。
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded();
        let id = SubscriberId(self.next_id.get() + 1);
        self.next_id.set(id.0);

        self.subscribers.borrow_mut().insert(id, sender);

        Subscription {
            id,
            receiver,
            registry: Rc::downgrade(&self.subscribers),
        }
    }

    /// 取消订阅
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.borrow_mut().remove(&id).is_some()
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// 广播事件
    pub fn emit(&self, event: Event) {
        tracing::trace!("emit {}", event.name());
        // 接收端已关闭的订阅者直接清理
        self.subscribers
            .borrow_mut()
            .retain(|_, sender| sender.unbounded_send(event.clone()).is_ok());
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// 订阅句柄
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::UnboundedReceiver<Event>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// 非阻塞地取出一条事件
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.next().now_or_never().flatten()
    }

    /// 取出当前已到达的所有事件
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().remove(&self.id);
        }
    }
}
