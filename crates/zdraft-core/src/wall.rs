//! 墙体定义
//!
//! 墙体是带厚度、高度和材质的线段。派生字段（长度、角度、方向、法向）
//! 在每次几何变化后由 [`WallSegment::recompute`] 重新计算。

use crate::error::CoreError;
use crate::geometry::Segment;
use crate::math::{to_plan, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 墙体ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WallId(pub u64);

impl fmt::Display for WallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wall#{}", self.0)
    }
}

/// 洞口ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpeningId(pub u64);

/// 墙体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WallType {
    /// 外墙
    #[default]
    Exterior,
    /// 内墙
    Interior,
    /// 隔断
    Partition,
    /// 挡土墙
    Retaining,
}

/// 墙体参数配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WallConfig {
    /// 最短墙长
    pub min_wall_length: f64,
    /// 最长墙长
    pub max_wall_length: f64,
    /// 默认厚度
    pub thickness: f64,
    /// 默认高度
    pub height: f64,
    /// 默认材质
    pub material: String,
    /// 默认类型
    pub wall_type: WallType,
}

impl Default for WallConfig {
    fn default() -> Self {
        Self {
            min_wall_length: 0.1,
            max_wall_length: 100.0,
            thickness: 0.2,
            height: 2.7,
            material: "concrete".to_string(),
            wall_type: WallType::Exterior,
        }
    }
}

impl WallConfig {
    /// 长度是否在允许范围内
    pub fn accepts_length(&self, length: f64) -> bool {
        length.is_finite() && length >= self.min_wall_length && length <= self.max_wall_length
    }
}

/// 洞口类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpeningKind {
    Door,
    Window,
    Opening,
}

impl OpeningKind {
    /// 默认宽度和高度
    pub fn default_size(&self) -> (f64, f64) {
        match self {
            OpeningKind::Door => (0.9, 2.1),
            OpeningKind::Window => (1.2, 1.2),
            OpeningKind::Opening => (1.0, 2.1),
        }
    }
}

/// 墙上洞口（门、窗、开口）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opening {
    pub id: OpeningId,
    pub kind: OpeningKind,
    /// 洞口中心距墙起点的距离
    pub offset: f64,
    pub width: f64,
    pub height: f64,
}

impl Opening {
    fn span(&self) -> (f64, f64) {
        (self.offset - self.width / 2.0, self.offset + self.width / 2.0)
    }
}

/// 墙体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallSegment {
    pub id: WallId,
    pub start: Point3,
    pub end: Point3,
    pub thickness: f64,
    pub height: f64,
    pub material: String,
    pub wall_type: WallType,
    /// 预览中的临时墙体
    pub is_temporary: bool,
    pub openings: Vec<Opening>,

    // 派生字段
    length: f64,
    angle: f64,
    direction: Vector2,
    normal: Vector2,
}

impl WallSegment {
    /// 使用配置中的默认属性创建墙体
    pub fn new(id: WallId, start: Point3, end: Point3, config: &WallConfig) -> Self {
        let mut wall = Self {
            id,
            start,
            end,
            thickness: config.thickness,
            height: config.height,
            material: config.material.clone(),
            wall_type: config.wall_type,
            is_temporary: false,
            openings: Vec::new(),
            length: 0.0,
            angle: 0.0,
            direction: Vector2::zeros(),
            normal: Vector2::zeros(),
        };
        wall.recompute();
        wall
    }

    /// 创建预览用的临时墙体
    pub fn temporary(start: Point3, end: Point3, config: &WallConfig) -> Self {
        let mut wall = Self::new(WallId(0), start, end, config);
        wall.is_temporary = true;
        wall
    }

    /// 重新计算派生字段
    pub fn recompute(&mut self) {
        let seg = self.segment();
        self.length = seg.length();
        self.angle = seg.angle();
        self.direction = seg.direction().unwrap_or_else(Vector2::zeros);
        self.normal = seg.normal().unwrap_or_else(Vector2::zeros);
    }

    /// 平面投影线段
    pub fn segment(&self) -> Segment {
        Segment::new(to_plan(&self.start), to_plan(&self.end))
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// 方向角（弧度）
    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn direction(&self) -> Vector2 {
        self.direction
    }

    pub fn normal(&self) -> Vector2 {
        self.normal
    }

    /// 设置端点并重新计算
    pub fn set_endpoints(&mut self, start: Point3, end: Point3) {
        self.start = start;
        self.end = end;
        self.recompute();
    }

    /// 平移
    pub fn translate(&mut self, offset: Vector3) {
        self.start += offset;
        self.end += offset;
        self.recompute();
    }

    /// 添加洞口
    ///
    /// 洞口必须完整落在墙内且不与已有洞口重叠，高度不超过墙高。
    pub fn add_opening(&mut self, opening: Opening) -> Result<(), CoreError> {
        let (lo, hi) = opening.span();
        if opening.width <= 0.0 || opening.height <= 0.0 {
            return Err(CoreError::InvalidOpening {
                wall: self.id,
                reason: "opening size must be positive".to_string(),
            });
        }
        if lo < 0.0 || hi > self.length {
            return Err(CoreError::InvalidOpening {
                wall: self.id,
                reason: format!(
                    "opening [{:.3}, {:.3}] does not fit wall length {:.3}",
                    lo, hi, self.length
                ),
            });
        }
        if opening.height > self.height {
            return Err(CoreError::InvalidOpening {
                wall: self.id,
                reason: format!(
                    "opening height {:.3} exceeds wall height {:.3}",
                    opening.height, self.height
                ),
            });
        }
        if let Some(other) = self.openings.iter().find(|o| {
            let (olo, ohi) = o.span();
            lo < ohi && olo < hi
        }) {
            return Err(CoreError::InvalidOpening {
                wall: self.id,
                reason: format!("overlaps opening {}", other.id.0),
            });
        }

        self.openings.push(opening);
        self.openings
            .sort_by(|a, b| a.offset.partial_cmp(&b.offset).unwrap_or(std::cmp::Ordering::Equal));
        Ok(())
    }

    /// 移除洞口
    pub fn remove_opening(&mut self, id: OpeningId) -> Option<Opening> {
        let index = self.openings.iter().position(|o| o.id == id)?;
        Some(self.openings.remove(index))
    }
}
