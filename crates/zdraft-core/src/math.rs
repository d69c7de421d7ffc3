//! 数学基础类型
//!
//! 基于 nalgebra 的点/向量别名，以及角度归一化等小工具。

use std::f64::consts::{FRAC_PI_2, PI};

pub type Point2 = nalgebra::Point2<f64>;
pub type Point3 = nalgebra::Point3<f64>;
pub type Vector2 = nalgebra::Vector2<f64>;
pub type Vector3 = nalgebra::Vector3<f64>;

/// 通用几何容差
pub const EPSILON: f64 = 1e-9;

/// 线段求交时判定平行的分母容差
pub const PARALLEL_EPSILON: f64 = 1e-10;

/// 将角度归一化到 (-π, π]
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a <= -PI {
        a += 2.0 * PI;
    } else if a > PI {
        a -= 2.0 * PI;
    }
    a
}

/// 将角度归一化到 (-π/2, π/2]
///
/// 用于方向无关的比较（平行/垂直）。
pub fn normalize_half_turn(angle: f64) -> f64 {
    let mut a = angle % PI;
    if a <= -FRAC_PI_2 {
        a += PI;
    } else if a > FRAC_PI_2 {
        a -= PI;
    }
    a
}

/// 三维点投影到 XY 平面
pub fn to_plan(p: &Point3) -> Point2 {
    Point2::new(p.x, p.y)
}

/// 二维点抬升到指定高程
pub fn from_plan(p: &Point2, z: f64) -> Point3 {
    Point3::new(p.x, p.y, z)
}
