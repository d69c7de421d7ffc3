//! 几何图元定义
//!
//! 墙体中心线和约束直线共用的线段运算。
//!
//! 所有计算都在 XY 平面内进行。

use crate::math::{Point2, Vector2, EPSILON, PARALLEL_EPSILON};
use serde::{Deserialize, Serialize};

/// 两点距离
pub fn distance(a: &Point2, b: &Point2) -> f64 {
    (b - a).norm()
}

/// 从 a 指向 b 的方向角（弧度）
pub fn angle_between(a: &Point2, b: &Point2) -> f64 {
    (b.y - a.y).atan2(b.x - a.x)
}

/// 二维叉积（z 分量）
pub fn cross(a: &Vector2, b: &Vector2) -> f64 {
    a.x * b.y - a.y * b.x
}

/// 线段
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Point2,
    pub end: Point2,
}

impl Segment {
    pub fn new(start: Point2, end: Point2) -> Self {
        Self { start, end }
    }

    /// 计算线段长度
    pub fn length(&self) -> f64 {
        (self.end - self.start).norm()
    }

    /// 起点指向终点的向量
    pub fn vector(&self) -> Vector2 {
        self.end - self.start
    }

    /// 单位方向向量，退化线段返回 None
    pub fn direction(&self) -> Option<Vector2> {
        let v = self.vector();
        let len = v.norm();
        if len < EPSILON {
            None
        } else {
            Some(v / len)
        }
    }

    /// 左手法向（方向逆时针旋转90°）
    pub fn normal(&self) -> Option<Vector2> {
        self.direction().map(|d| Vector2::new(-d.y, d.x))
    }

    /// 方向角（弧度）
    pub fn angle(&self) -> f64 {
        angle_between(&self.start, &self.end)
    }

    /// 计算线段中点
    pub fn midpoint(&self) -> Point2 {
        Point2::new(
            (self.start.x + self.end.x) / 2.0,
            (self.start.y + self.end.y) / 2.0,
        )
    }

    /// 点在无限延长线上的投影参数 t（start=0, end=1）
    pub fn project_parameter(&self, point: &Point2) -> Option<f64> {
        let v = self.vector();
        let c2 = v.dot(&v);
        if c2 < EPSILON {
            return None;
        }
        Some((point - self.start).dot(&v) / c2)
    }

    /// 点在无限延长线上的投影点
    pub fn project_onto_line(&self, point: &Point2) -> Option<Point2> {
        self.project_parameter(point)
            .map(|t| self.start + self.vector() * t)
    }

    /// 线段上距离给定点最近的点
    pub fn nearest_point(&self, point: &Point2) -> Point2 {
        let v = self.vector();
        let w = point - self.start;

        let c1 = w.dot(&v);
        if c1 <= 0.0 {
            return self.start;
        }

        let c2 = v.dot(&v);
        if c2 <= c1 {
            return self.end;
        }

        self.start + v * (c1 / c2)
    }

    /// 计算点到线段的距离
    pub fn distance_to_point(&self, point: &Point2) -> f64 {
        (point - self.nearest_point(point)).norm()
    }

    /// 点到无限直线的距离（退化线段退化为点距）
    pub fn distance_to_line(&self, point: &Point2) -> f64 {
        match self.direction() {
            Some(dir) => cross(&dir, &(point - self.start)).abs(),
            None => distance(&self.start, point),
        }
    }

    /// 线段-线段交点
    ///
    /// 标准参数化求交，仅当 t、u 都落在 [0,1] 内才返回（即交点在两条有限线段上）。
    /// 平行或共线（分母 < 1e-10）没有交点。
    pub fn intersection(&self, other: &Segment) -> Option<Point2> {
        let d1 = self.vector();
        let d2 = other.vector();

        let denom = cross(&d1, &d2);
        if denom.abs() < PARALLEL_EPSILON {
            return None;
        }

        let d = other.start - self.start;
        let t = cross(&d, &d2) / denom;
        let u = cross(&d, &d1) / denom;

        if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
            Some(self.start + d1 * t)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_length() {
        let seg = Segment::new(Point2::new(0.0, 0.0), Point2::new(3.0, 4.0));
        assert!((seg.length() - 5.0).abs() < EPSILON);
        assert!((distance(&seg.start, &seg.end) - 5.0).abs() < EPSILON);
    }

    #[test]
    fn test_direction_and_normal() {
        let seg = Segment::new(Point2::new(1.0, 1.0), Point2::new(1.0, 4.0));
        let dir = seg.direction().unwrap();
        assert!((dir.y - 1.0).abs() < EPSILON);
        let normal = seg.normal().unwrap();
        assert!((normal.x + 1.0).abs() < EPSILON);
        assert!((seg.angle() - std::f64::consts::FRAC_PI_2).abs() < EPSILON);

        let degenerate = Segment::new(Point2::new(2.0, 2.0), Point2::new(2.0, 2.0));
        assert!(degenerate.direction().is_none());
    }

    #[test]
    fn test_segment_intersection() {
        let s1 = Segment::new(Point2::new(0.0, 0.0), Point2::new(10.0, 10.0));
        let s2 = Segment::new(Point2::new(0.0, 10.0), Point2::new(10.0, 0.0));

        let p = s1.intersection(&s2).unwrap();
        assert!((p.x - 5.0).abs() < EPSILON);
        assert!((p.y - 5.0).abs() < EPSILON);
    }

    #[test]
    fn test_intersection_outside_segments() {
        // 延长线相交，但交点不在有限线段上
        let s1 = Segment::new(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0));
        let s2 = Segment::new(Point2::new(5.0, -1.0), Point2::new(5.0, 1.0));
        assert!(s1.intersection(&s2).is_none());
    }

    #[test]
    fn test_parallel_segments_do_not_intersect() {
        let s1 = Segment::new(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));
        let s2 = Segment::new(Point2::new(0.0, 1.0), Point2::new(10.0, 1.0));
        assert!(s1.intersection(&s2).is_none());

        let collinear = Segment::new(Point2::new(2.0, 0.0), Point2::new(8.0, 0.0));
        assert!(s1.intersection(&collinear).is_none());
    }

    #[test]
    fn test_touching_endpoints_intersect() {
        let s1 = Segment::new(Point2::new(0.0, 0.0), Point2::new(5.0, 0.0));
        let s2 = Segment::new(Point2::new(5.0, 0.0), Point2::new(5.0, 5.0));
        let p = s1.intersection(&s2).unwrap();
        assert!((p.x - 5.0).abs() < EPSILON);
    }

    #[test]
    fn test_nearest_point() {
        let seg = Segment::new(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));

        // 中间点
        let nearest = seg.nearest_point(&Point2::new(5.0, 5.0));
        assert!((nearest.x - 5.0).abs() < EPSILON);
        assert!(nearest.y.abs() < EPSILON);

        // 线段外的点返回起点
        let nearest = seg.nearest_point(&Point2::new(-5.0, 0.0));
        assert!(nearest.x.abs() < EPSILON);

        assert!((seg.distance_to_line(&Point2::new(20.0, 3.0)) - 3.0).abs() < EPSILON);
        assert!((seg.distance_to_point(&Point2::new(20.0, 0.0)) - 10.0).abs() < EPSILON);
    }
}
