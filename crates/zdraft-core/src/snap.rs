//! 对象捕捉系统
//!
//! 从已提交的墙体中维护候选捕捉点，并回答“点 P 的最佳捕捉点”查询。
//!
//! 支持的捕捉类型：
//! - 端点 (Endpoint) / 角点 (Corner)
//! - 中点 (Midpoint)
//! - 交点 (Intersection)
//! - 垂足 (Perpendicular)
//! - 平行 (Parallel)，角度锁定也归入此类
//! - 延长线 (Extension)
//! - 网格点 (Grid)
//!
//! 候选点按 (优先级降序, 距离升序) 稳定排序，第一个胜出。

use crate::geometry::Segment;
use crate::math::{Point2, Vector2, EPSILON};
use crate::wall::{WallId, WallSegment};
use serde::{Deserialize, Serialize};

/// 两个端点视为同一位置的距离
const COINCIDENT_TOLERANCE: f64 = 1e-6;

/// 捕捉类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapType {
    /// 网格点捕捉
    Grid,
    /// 端点捕捉
    Endpoint,
    /// 中点捕捉
    Midpoint,
    /// 垂足捕捉
    Perpendicular,
    /// 平行捕捉
    Parallel,
    /// 交点捕捉
    Intersection,
    /// 延长线捕捉
    Extension,
    /// 角点（多面墙共享的端点）
    Corner,
    /// 未捕捉
    None,
}

impl SnapType {
    /// 固定优先级表
    pub fn priority(&self) -> u8 {
        match self {
            SnapType::Endpoint | SnapType::Corner => 10,
            SnapType::Intersection => 9,
            SnapType::Perpendicular => 8,
            SnapType::Midpoint => 7,
            SnapType::Parallel => 6,
            SnapType::Extension => 5,
            SnapType::Grid => 4,
            SnapType::None => 1,
        }
    }

    /// 获取捕捉类型的名称
    pub fn name(&self) -> &'static str {
        match self {
            SnapType::Grid => "网格点",
            SnapType::Endpoint => "端点",
            SnapType::Midpoint => "中点",
            SnapType::Perpendicular => "垂足",
            SnapType::Parallel => "平行",
            SnapType::Intersection => "交点",
            SnapType::Extension => "延长线",
            SnapType::Corner => "角点",
            SnapType::None => "无",
        }
    }
}

/// 捕捉点的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapSource {
    None,
    Wall(WallId),
    /// 交点、角点涉及两面墙
    ///
    /// 三面以上墙共享的角点只记录按重建顺序最先出现的两面墙。
    Walls(WallId, WallId),
}

/// 捕捉点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapPoint {
    /// 捕捉到的坐标
    pub position: Point2,
    /// 捕捉类型
    pub snap_type: SnapType,
    /// 关联的墙体
    pub source: SnapSource,
    /// 优先级（由类型决定）
    pub priority: u8,
    /// 距原始点的距离（用于排序）
    pub distance: f64,
}

impl SnapPoint {
    pub fn new(position: Point2, snap_type: SnapType, source: SnapSource, distance: f64) -> Self {
        Self {
            position,
            snap_type,
            source,
            priority: snap_type.priority(),
            distance,
        }
    }

    /// 未捕捉：原样返回原始点
    pub fn none(position: Point2) -> Self {
        Self::new(position, SnapType::None, SnapSource::None, 0.0)
    }

    pub fn is_snapped(&self) -> bool {
        self.snap_type != SnapType::None
    }
}

/// 捕捉掩码（位域，用于快速启用/禁用捕捉类型）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapMask {
    bits: u16,
}

impl SnapMask {
    pub const GRID: u16 = 1 << 0;
    pub const ENDPOINT: u16 = 1 << 1;
    pub const MIDPOINT: u16 = 1 << 2;
    pub const PERPENDICULAR: u16 = 1 << 3;
    pub const PARALLEL: u16 = 1 << 4;
    pub const INTERSECTION: u16 = 1 << 5;
    pub const EXTENSION: u16 = 1 << 6;
    pub const CORNER: u16 = 1 << 7;

    pub const NONE: SnapMask = SnapMask { bits: 0 };
    pub const ALL: SnapMask = SnapMask { bits: 0xFFFF };

    pub fn new(bits: u16) -> Self {
        Self { bits }
    }

    fn bit(snap_type: SnapType) -> u16 {
        match snap_type {
            SnapType::Grid => Self::GRID,
            SnapType::Endpoint => Self::ENDPOINT,
            SnapType::Midpoint => Self::MIDPOINT,
            SnapType::Perpendicular => Self::PERPENDICULAR,
            SnapType::Parallel => Self::PARALLEL,
            SnapType::Intersection => Self::INTERSECTION,
            SnapType::Extension => Self::EXTENSION,
            SnapType::Corner => Self::CORNER,
            SnapType::None => 0,
        }
    }

    pub fn is_enabled(&self, snap_type: SnapType) -> bool {
        self.bits & Self::bit(snap_type) != 0
    }

    pub fn set(&mut self, snap_type: SnapType, enabled: bool) {
        let bit = Self::bit(snap_type);
        if enabled {
            self.bits |= bit;
        } else {
            self.bits &= !bit;
        }
    }

    pub fn toggle(&mut self, snap_type: SnapType) {
        let enabled = self.is_enabled(snap_type);
        self.set(snap_type, !enabled);
    }
}

impl Default for SnapMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// 捕捉配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapConfig {
    /// 网格间距（<= 0 关闭网格捕捉）
    pub grid_size: f64,
    /// 捕捉容差（绘图坐标单位）
    pub snap_tolerance: f64,
    /// 角度锁定增量（度）
    pub angle_lock_increment: f64,
    /// 启用的捕捉类型
    pub enabled_types: SnapMask,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            grid_size: 0.5,
            snap_tolerance: 0.25,
            angle_lock_increment: 15.0,
            enabled_types: SnapMask::default(),
        }
    }
}

/// 单次查询的上下文
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapContext {
    /// 当前绘制的起点（用于角度锁定、垂足、平行）
    pub start_point: Option<Point2>,
    /// Shift 角度锁定
    pub angle_lock: bool,
    /// Ctrl 临时关闭捕捉
    pub bypass: bool,
}

/// 捕捉索引
///
/// 墙体集合变化后调用 [`SnapIndex::rebuild`]，查询时不再遍历墙体对。
#[derive(Debug, Clone)]
pub struct SnapIndex {
    config: SnapConfig,
    /// 注册的静态捕捉点（端点、角点、中点、交点）
    points: Vec<SnapPoint>,
    /// 墙体中心线（用于垂足、平行、延长线）
    lines: Vec<(WallId, Segment)>,
    /// 查询时的候选缓存
    candidates: Vec<SnapPoint>,
}

impl SnapIndex {
    pub fn new(config: SnapConfig) -> Self {
        Self {
            config,
            points: Vec::new(),
            lines: Vec::new(),
            candidates: Vec::with_capacity(64),
        }
    }

    /// 获取配置
    pub fn config(&self) -> &SnapConfig {
        &self.config
    }

    /// 获取配置（可变）
    pub fn config_mut(&mut self) -> &mut SnapConfig {
        &mut self.config
    }

    /// 已注册的捕捉点
    pub fn points(&self) -> &[SnapPoint] {
        &self.points
    }

    /// 由墙体集合重建索引
    pub fn rebuild<'a>(&mut self, walls: impl IntoIterator<Item = &'a WallSegment>) {
        self.points.clear();
        self.lines = walls
            .into_iter()
            .filter(|w| !w.is_temporary)
            .map(|w| (w.id, w.segment()))
            .collect();

        self.collect_endpoints();
        self.collect_midpoints();
        self.collect_intersections();

        tracing::debug!(
            "Snap index rebuilt: {} walls, {} snap points",
            self.lines.len(),
            self.points.len()
        );
    }

    /// 端点，被两面以上墙共享时升级为角点
    fn collect_endpoints(&mut self) {
        let mut groups: Vec<(Point2, Vec<WallId>)> = Vec::new();

        for (id, seg) in &self.lines {
            for p in [seg.start, seg.end] {
                match groups
                    .iter_mut()
                    .find(|(q, _)| (q - p).norm() < COINCIDENT_TOLERANCE)
                {
                    Some((_, ids)) => {
                        if !ids.contains(id) {
                            ids.push(*id);
                        }
                    }
                    None => groups.push((p, vec![*id])),
                }
            }
        }

        for (position, ids) in groups {
            let point = if ids.len() >= 2 {
                SnapPoint::new(position, SnapType::Corner, SnapSource::Walls(ids[0], ids[1]), 0.0)
            } else {
                SnapPoint::new(position, SnapType::Endpoint, SnapSource::Wall(ids[0]), 0.0)
            };
            self.points.push(point);
        }
    }

    fn collect_midpoints(&mut self) {
        for (id, seg) in &self.lines {
            self.points.push(SnapPoint::new(
                seg.midpoint(),
                SnapType::Midpoint,
                SnapSource::Wall(*id),
                0.0,
            ));
        }
    }

    /// 双重循环检查所有墙体对
    fn collect_intersections(&mut self) {
        for i in 0..self.lines.len() {
            for j in (i + 1)..self.lines.len() {
                let (id_a, seg_a) = &self.lines[i];
                let (id_b, seg_b) = &self.lines[j];

                if let Some(p) = seg_a.intersection(seg_b) {
                    // 落在端点上的交点已作为端点/角点登记
                    let on_endpoint = [seg_a.start, seg_a.end, seg_b.start, seg_b.end]
                        .iter()
                        .any(|q| (q - p).norm() < COINCIDENT_TOLERANCE);
                    if !on_endpoint {
                        self.points.push(SnapPoint::new(
                            p,
                            SnapType::Intersection,
                            SnapSource::Walls(*id_a, *id_b),
                            0.0,
                        ));
                    }
                }
            }
        }
    }

    /// 寻找最佳捕捉点
    ///
    /// 没有候选时原样返回原始点，类型为 [`SnapType::None`]。
    pub fn snap(&mut self, raw: Point2, ctx: &SnapContext) -> SnapPoint {
        if ctx.bypass {
            return SnapPoint::none(raw);
        }

        self.candidates.clear();
        let tolerance = self.config.snap_tolerance;

        // 1. 网格捕捉
        if self.config.enabled_types.is_enabled(SnapType::Grid) {
            if let Some(snap) = self.snap_to_grid(raw, tolerance) {
                self.candidates.push(snap);
            }
        }

        // 2. 已注册的捕捉点
        for point in &self.points {
            if !self.config.enabled_types.is_enabled(point.snap_type) {
                continue;
            }
            let dist = (point.position - raw).norm();
            if dist <= tolerance {
                self.candidates.push(SnapPoint { distance: dist, ..*point });
            }
        }

        // 3. 角度锁定
        if ctx.angle_lock {
            if let Some(start) = ctx.start_point {
                if let Some(snap) = self.angle_locked(start, raw) {
                    self.candidates.push(snap);
                }
            }
        }

        // 4. 与墙体中心线相关的动态捕捉
        self.collect_line_candidates(raw, ctx.start_point, tolerance);

        // 5. (优先级降序, 距离升序)，稳定排序保证同分时结果一致
        self.candidates.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then(
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });

        self.candidates
            .first()
            .copied()
            .unwrap_or_else(|| SnapPoint::none(raw))
    }

    /// 网格捕捉
    fn snap_to_grid(&self, raw: Point2, tolerance: f64) -> Option<SnapPoint> {
        let spacing = self.config.grid_size;
        if spacing <= 0.0 {
            return None;
        }

        let grid_point = Point2::new(
            (raw.x / spacing).round() * spacing,
            (raw.y / spacing).round() * spacing,
        );

        let dist = (grid_point - raw).norm();
        if dist <= tolerance {
            Some(SnapPoint::new(grid_point, SnapType::Grid, SnapSource::None, dist))
        } else {
            None
        }
    }

    /// 将光标投影到距起点最近的锁定角度方向上
    fn angle_locked(&self, start: Point2, raw: Point2) -> Option<SnapPoint> {
        let increment = self.config.angle_lock_increment.to_radians();
        let v = raw - start;
        if v.norm() < EPSILON || increment <= 0.0 {
            return None;
        }

        let angle = v.y.atan2(v.x);
        let locked = (angle / increment).round() * increment;
        let dir = Vector2::new(locked.cos(), locked.sin());
        let position = start + dir * v.dot(&dir);

        Some(SnapPoint::new(
            position,
            SnapType::Parallel,
            SnapSource::None,
            (position - raw).norm(),
        ))
    }

    /// 垂足、平行、延长线
    fn collect_line_candidates(&mut self, raw: Point2, start: Option<Point2>, tolerance: f64) {
        let enabled = self.config.enabled_types;

        for (id, seg) in &self.lines {
            let Some(dir) = seg.direction() else {
                continue;
            };

            // 延长线：投影落在线段两端之外
            if enabled.is_enabled(SnapType::Extension) {
                if let Some(t) = seg.project_parameter(&raw) {
                    if !(0.0..=1.0).contains(&t) {
                        let p = seg.start + seg.vector() * t;
                        let dist = (p - raw).norm();
                        if dist <= tolerance {
                            self.candidates.push(SnapPoint::new(
                                p,
                                SnapType::Extension,
                                SnapSource::Wall(*id),
                                dist,
                            ));
                        }
                    }
                }
            }

            let Some(start) = start else {
                continue;
            };

            // 垂足：从起点到墙体的垂足必须在墙上
            if enabled.is_enabled(SnapType::Perpendicular) {
                if let Some(t) = seg.project_parameter(&start) {
                    if (0.0..=1.0).contains(&t) {
                        let foot = seg.start + seg.vector() * t;
                        let dist = (foot - raw).norm();
                        if dist <= tolerance && (foot - start).norm() > EPSILON {
                            self.candidates.push(SnapPoint::new(
                                foot,
                                SnapType::Perpendicular,
                                SnapSource::Wall(*id),
                                dist,
                            ));
                        }
                    }
                }
            }

            // 平行：过起点、与墙同向的直线
            if enabled.is_enabled(SnapType::Parallel) {
                let p = start + dir * (raw - start).dot(&dir);
                let dist = (p - raw).norm();
                if dist <= tolerance && (p - start).norm() > EPSILON {
                    self.candidates.push(SnapPoint::new(
                        p,
                        SnapType::Parallel,
                        SnapSource::Wall(*id),
                        dist,
                    ));
                }
            }
        }
    }
}

impl Default for SnapIndex {
    fn default() -> Self {
        Self::new(SnapConfig::default())
    }
}
