//! 墙体绘制状态机
//!
//! 绘制流程：
//! - `start_drawing`：指定起点，进入 Drawing
//! - `continue_drawing`：鼠标移动，更新临时预览墙体
//! - `finish_wall_segment`：确定终点并提交墙体，终点成为下一段的起点（Continuing）
//! - `cancel_drawing` / `finish_drawing`：回到 Idle
//!
//! 光标回到链起点附近且本链已有两面以上墙体时进入 Closing，提示可以闭合房间。

use crate::entity::positive;
use crate::error::CoreError;
use crate::events::{Event, EventBus};
use crate::geometry::distance;
use crate::math::{from_plan, to_plan, Point2, Point3, Vector2, Vector3};
use crate::snap::{SnapConfig, SnapContext, SnapIndex, SnapPoint};
use crate::wall::{Opening, OpeningId, OpeningKind, WallConfig, WallId, WallSegment, WallType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 绘制状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DrawingState {
    /// 空闲
    #[default]
    Idle,
    /// 已指定起点，等待第一段的终点
    Drawing,
    /// 连续绘制
    Continuing,
    /// 光标靠近链起点，可闭合
    Closing,
}

/// 按键状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyModifiers {
    /// 角度锁定
    pub shift: bool,
    /// 临时关闭捕捉
    pub ctrl: bool,
}

/// 提交一段墙体的结果
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    Committed {
        wall: WallSegment,
        /// 形成闭合房间时涉及的墙体
        room_closed: Option<Vec<WallId>>,
    },
    /// 长度超出范围，状态不变，可换一个终点重试
    Rejected { length: f64 },
}

/// 墙体属性补丁
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WallPatch {
    pub start: Option<Point3>,
    pub end: Option<Point3>,
    pub thickness: Option<f64>,
    pub height: Option<f64>,
    pub material: Option<String>,
    pub wall_type: Option<WallType>,
}

/// 洞口参数，缺省尺寸取洞口类型的默认值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpeningSpec {
    pub kind: OpeningKind,
    /// 洞口中心距墙起点的距离
    pub offset: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl OpeningSpec {
    pub fn new(kind: OpeningKind, offset: f64) -> Self {
        Self {
            kind,
            offset,
            width: None,
            height: None,
        }
    }
}

/// 墙体绘制器
///
/// 拥有全部墙体以及由它们生成的捕捉索引。
#[derive(Debug)]
pub struct WallDrawer {
    config: WallConfig,
    walls: BTreeMap<WallId, WallSegment>,
    snap: SnapIndex,
    bus: EventBus,

    state: DrawingState,
    /// 当前段的起点
    start_point: Option<Point2>,
    /// 本链第一个点
    chain_origin: Option<Point2>,
    /// 本链已提交的墙体
    chain: Vec<WallId>,
    /// 临时预览墙体
    preview: Option<WallSegment>,
    /// 最近一次跟踪到的（已捕捉的）光标位置
    last_point: Option<Point2>,
    modifiers: KeyModifiers,

    next_wall_id: u64,
    next_opening_id: u64,
}

impl WallDrawer {
    pub fn new(config: WallConfig, snap_config: SnapConfig, bus: EventBus) -> Self {
        Self {
            config,
            walls: BTreeMap::new(),
            snap: SnapIndex::new(snap_config),
            bus,
            state: DrawingState::Idle,
            start_point: None,
            chain_origin: None,
            chain: Vec::new(),
            preview: None,
            last_point: None,
            modifiers: KeyModifiers::default(),
            next_wall_id: 1,
            next_opening_id: 1,
        }
    }

    // === 查询 ===

    pub fn state(&self) -> DrawingState {
        self.state
    }

    pub fn start_point(&self) -> Option<Point2> {
        self.start_point
    }

    /// 当前预览墙体
    pub fn preview(&self) -> Option<&WallSegment> {
        self.preview.as_ref()
    }

    pub fn wall(&self, id: WallId) -> Option<&WallSegment> {
        self.walls.get(&id)
    }

    /// 所有已提交的墙体（按ID排序）
    pub fn walls(&self) -> impl Iterator<Item = &WallSegment> {
        self.walls.values()
    }

    pub fn wall_count(&self) -> usize {
        self.walls.len()
    }

    /// 本链已提交的墙体
    pub fn chain(&self) -> &[WallId] {
        &self.chain
    }

    pub fn config(&self) -> &WallConfig {
        &self.config
    }

    pub fn snap_index(&self) -> &SnapIndex {
        &self.snap
    }

    pub fn modifiers(&self) -> KeyModifiers {
        self.modifiers
    }

    /// 设置按键状态：shift 角度锁定，ctrl 临时关闭捕捉
    pub fn set_modifiers(&mut self, modifiers: KeyModifiers) {
        self.modifiers = modifiers;
    }

    /// 查询捕捉结果（用于悬停提示）
    pub fn snapped_point(&mut self, raw: Point2) -> SnapPoint {
        let ctx = SnapContext {
            start_point: self.start_point,
            angle_lock: self.modifiers.shift,
            bypass: self.modifiers.ctrl,
        };
        self.snap.snap(raw, &ctx)
    }

    // === 绘制流程 ===

    /// 指定起点
    pub fn start_drawing(&mut self, raw: Point2) -> SnapPoint {
        self.discard_chain();
        let snap = self.snapped_point(raw);

        self.start_point = Some(snap.position);
        self.chain_origin = Some(snap.position);
        self.state = DrawingState::Drawing;

        tracing::debug!(
            "Drawing started at ({:.3}, {:.3}) [{}]",
            snap.position.x,
            snap.position.y,
            snap.snap_type.name()
        );
        self.bus.emit(Event::DrawingStarted {
            point: snap.position,
            snap,
        });
        snap
    }

    /// 更新预览（不修改已提交的墙体）
    pub fn continue_drawing(&mut self, raw: Point2) -> Result<SnapPoint, CoreError> {
        let start = self.start_point.ok_or(CoreError::NotDrawing)?;
        let snap = self.snapped_point(raw);
        let end = snap.position;

        let preview = WallSegment::temporary(from_plan(&start, 0.0), from_plan(&end, 0.0), &self.config);
        self.preview = Some(preview.clone());
        self.last_point = Some(end);
        self.state = self.tracking_state(end);

        self.bus.emit(Event::DrawingContinued { preview, snap });
        Ok(snap)
    }

    fn tracking_state(&self, cursor: Point2) -> DrawingState {
        let near_origin = self
            .chain_origin
            .map(|origin| distance(&origin, &cursor) <= self.snap.config().snap_tolerance)
            .unwrap_or(false);

        if near_origin && self.chain.len() >= 2 {
            DrawingState::Closing
        } else if self.chain.is_empty() {
            DrawingState::Drawing
        } else {
            DrawingState::Continuing
        }
    }

    /// 确定终点并提交墙体
    ///
    /// 不给出终点时使用最近一次跟踪到的光标位置。
    pub fn finish_wall_segment(&mut self, raw: Option<Point2>) -> Result<SegmentOutcome, CoreError> {
        let start = self.start_point.ok_or(CoreError::NotDrawing)?;
        let end = match raw {
            Some(p) => self.snapped_point(p).position,
            None => self.last_point.unwrap_or(start),
        };

        let length = distance(&start, &end);
        if !self.config.accepts_length(length) {
            tracing::warn!(
                "Rejected wall segment of length {:.3} (allowed {} to {})",
                length,
                self.config.min_wall_length,
                self.config.max_wall_length
            );
            return Ok(SegmentOutcome::Rejected { length });
        }

        let id = self.allocate_wall_id();
        let wall = WallSegment::new(id, from_plan(&start, 0.0), from_plan(&end, 0.0), &self.config);
        self.walls.insert(id, wall.clone());
        self.chain.push(id);
        self.rebuild_snap_index();

        tracing::info!("Wall {} committed, length {:.3}", id, wall.length());
        self.bus.emit(Event::WallCreated {
            wall: wall.clone(),
            can_continue: true,
        });

        let room_closed = self.detect_room_closure(&wall);
        if let Some(ids) = &room_closed {
            tracing::info!("Room closed by {} walls", ids.len());
            self.bus.emit(Event::RoomClosed { wall_ids: ids.clone() });
        }

        self.start_point = Some(end);
        self.preview = None;
        self.last_point = None;
        self.state = DrawingState::Continuing;

        Ok(SegmentOutcome::Committed { wall, room_closed })
    }

    /// 放弃预览并回到空闲，已提交的墙体保留
    pub fn cancel_drawing(&mut self) {
        if self.state != DrawingState::Idle {
            tracing::debug!("Drawing cancelled");
        }
        self.discard_chain();
    }

    /// 结束本链，返回本链提交的墙体数量
    pub fn finish_drawing(&mut self) -> usize {
        if self.state == DrawingState::Idle {
            return 0;
        }

        let walls_in_chain = self.chain.len();
        self.discard_chain();
        self.bus.emit(Event::DrawingFinished { walls_in_chain });
        walls_in_chain
    }

    fn discard_chain(&mut self) {
        self.state = DrawingState::Idle;
        self.start_point = None;
        self.chain_origin = None;
        self.chain.clear();
        self.preview = None;
        self.last_point = None;
    }

    /// 新墙起点和终点都与已有墙体端点相接时视为闭合
    fn detect_room_closure(&self, wall: &WallSegment) -> Option<Vec<WallId>> {
        let tolerance = self.snap.config().snap_tolerance;
        let connected_to = |point: &Point3| -> Vec<WallId> {
            let p = to_plan(point);
            self.walls
                .values()
                .filter(|w| w.id != wall.id)
                .filter(|w| {
                    distance(&to_plan(&w.start), &p) <= tolerance
                        || distance(&to_plan(&w.end), &p) <= tolerance
                })
                .map(|w| w.id)
                .collect()
        };

        let at_start = connected_to(&wall.start);
        let at_end = connected_to(&wall.end);
        if at_start.is_empty() || at_end.is_empty() {
            return None;
        }

        let mut ids = vec![wall.id];
        for id in at_start.into_iter().chain(at_end) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Some(ids)
    }

    // === 编辑 ===

    /// 删除墙体
    pub fn delete_wall(&mut self, id: WallId) -> Result<WallSegment, CoreError> {
        let wall = self.walls.remove(&id).ok_or(CoreError::WallNotFound(id))?;
        self.chain.retain(|w| *w != id);
        self.rebuild_snap_index();

        tracing::info!("Wall {} deleted", id);
        self.bus.emit(Event::WallDeleted { wall: wall.clone() });
        Ok(wall)
    }

    /// 修改墙体属性
    ///
    /// 几何变化后长度必须仍在范围内，已有洞口必须仍然放得下。
    pub fn update_wall(&mut self, id: WallId, patch: &WallPatch) -> Result<WallSegment, CoreError> {
        let current = self.walls.get(&id).ok_or(CoreError::WallNotFound(id))?;
        let mut wall = current.clone();

        if let Some(thickness) = patch.thickness {
            wall.thickness = positive("thickness", thickness)?;
        }
        if let Some(height) = patch.height {
            wall.height = positive("height", height)?;
        }
        if let Some(material) = &patch.material {
            wall.material = material.clone();
        }
        if let Some(wall_type) = patch.wall_type {
            wall.wall_type = wall_type;
        }
        if patch.start.is_some() || patch.end.is_some() {
            let start = patch.start.unwrap_or(wall.start);
            let end = patch.end.unwrap_or(wall.end);
            wall.set_endpoints(start, end);
            self.check_length(wall.length())?;
        }

        // 重新放置洞口以校验
        let openings = std::mem::take(&mut wall.openings);
        for opening in openings {
            wall.add_opening(opening)?;
        }

        self.walls.insert(id, wall.clone());
        self.rebuild_snap_index();
        self.bus.emit(Event::WallUpdated { wall: wall.clone() });
        Ok(wall)
    }

    /// 平移一组墙体
    pub fn move_walls(&mut self, ids: &[WallId], offset: Vector2) -> Result<(), CoreError> {
        if let Some(missing) = ids.iter().find(|id| !self.walls.contains_key(*id)) {
            return Err(CoreError::WallNotFound(*missing));
        }

        let shift = Vector3::new(offset.x, offset.y, 0.0);
        let mut moved = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(wall) = self.walls.get_mut(id) {
                wall.translate(shift);
                moved.push(wall.clone());
            }
        }
        self.rebuild_snap_index();

        tracing::debug!("Moved {} walls by ({:.3}, {:.3})", moved.len(), offset.x, offset.y);
        for wall in moved {
            self.bus.emit(Event::WallUpdated { wall });
        }
        Ok(())
    }

    /// 创建矩形房间（四面外墙，逆时针）
    pub fn create_room(
        &mut self,
        origin: Point2,
        width: f64,
        depth: f64,
        height: Option<f64>,
    ) -> Result<Vec<WallId>, CoreError> {
        self.check_length(width)?;
        self.check_length(depth)?;
        if let Some(h) = height {
            positive("height", h)?;
        }

        let corners = [
            origin,
            origin + Vector2::new(width, 0.0),
            origin + Vector2::new(width, depth),
            origin + Vector2::new(0.0, depth),
        ];

        let mut created = Vec::with_capacity(4);
        for i in 0..4 {
            let id = self.allocate_wall_id();
            let mut wall = WallSegment::new(
                id,
                from_plan(&corners[i], 0.0),
                from_plan(&corners[(i + 1) % 4], 0.0),
                &self.config,
            );
            wall.wall_type = WallType::Exterior;
            if let Some(h) = height {
                wall.height = h;
            }
            self.walls.insert(id, wall.clone());
            created.push(wall);
        }
        self.rebuild_snap_index();

        let ids: Vec<WallId> = created.iter().map(|w| w.id).collect();
        tracing::info!("Room {:.2} x {:.2} created with walls {:?}", width, depth, ids);
        for wall in created {
            self.bus.emit(Event::WallCreated {
                wall,
                can_continue: false,
            });
        }
        self.bus.emit(Event::RoomClosed { wall_ids: ids.clone() });
        Ok(ids)
    }

    /// 在墙上开洞
    pub fn add_opening(&mut self, wall_id: WallId, spec: OpeningSpec) -> Result<OpeningId, CoreError> {
        let wall = self
            .walls
            .get_mut(&wall_id)
            .ok_or(CoreError::WallNotFound(wall_id))?;

        let (default_width, default_height) = spec.kind.default_size();
        let id = OpeningId(self.next_opening_id);
        wall.add_opening(Opening {
            id,
            kind: spec.kind,
            offset: spec.offset,
            width: spec.width.unwrap_or(default_width),
            height: spec.height.unwrap_or(default_height),
        })?;
        self.next_opening_id += 1;

        let wall = wall.clone();
        self.bus.emit(Event::WallUpdated { wall });
        Ok(id)
    }

    /// 移除洞口
    pub fn remove_opening(
        &mut self,
        wall_id: WallId,
        opening_id: OpeningId,
    ) -> Result<Option<Opening>, CoreError> {
        let wall = self
            .walls
            .get_mut(&wall_id)
            .ok_or(CoreError::WallNotFound(wall_id))?;

        let removed = wall.remove_opening(opening_id);
        if removed.is_some() {
            let wall = wall.clone();
            self.bus.emit(Event::WallUpdated { wall });
        }
        Ok(removed)
    }

    /// 整体替换墙体集合（导入用），不发事件
    pub fn replace_walls(&mut self, walls: Vec<WallSegment>) {
        self.discard_chain();
        self.walls = walls.into_iter().map(|w| (w.id, w)).collect();
        self.next_wall_id = self.walls.keys().map(|id| id.0).max().unwrap_or(0) + 1;
        self.next_opening_id = self
            .walls
            .values()
            .flat_map(|w| w.openings.iter().map(|o| o.id.0))
            .max()
            .unwrap_or(0)
            + 1;
        self.rebuild_snap_index();
    }

    /// 清空所有墙体
    pub fn clear(&mut self) {
        self.replace_walls(Vec::new());
    }

    fn allocate_wall_id(&mut self) -> WallId {
        let id = WallId(self.next_wall_id);
        self.next_wall_id += 1;
        id
    }

    fn check_length(&self, length: f64) -> Result<(), CoreError> {
        if self.config.accepts_length(length) {
            Ok(())
        } else {
            Err(CoreError::InvalidWallLength {
                length,
                min: self.config.min_wall_length,
                max: self.config.max_wall_length,
            })
        }
    }

    fn rebuild_snap_index(&mut self) {
        self.snap.rebuild(self.walls.values());
    }
}
