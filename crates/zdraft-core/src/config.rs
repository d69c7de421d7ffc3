//! 引擎配置

use crate::snap::SnapConfig;
use crate::solver::SolverOptions;
use crate::wall::WallConfig;
use serde::{Deserialize, Serialize};

/// 引擎整体配置，缺省字段取默认值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 对象捕捉
    pub snap: SnapConfig,

    /// 墙体默认参数
    pub wall: WallConfig,

    /// 约束求解
    pub solver: SolverOptions,
}

impl EngineConfig {
    /// 从 JSON 文本读取
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// 输出为格式化的 JSON
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.snap.grid_size, 0.5);
        assert_eq!(config.snap.snap_tolerance, 0.25);
        assert_eq!(config.wall.min_wall_length, 0.1);
        assert_eq!(config.solver.max_iterations, 100);
    }

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json_str(r#"{ "snap": { "grid_size": 1.0 } }"#).unwrap();
        assert_eq!(config.snap.grid_size, 1.0);
        assert_eq!(config.snap.snap_tolerance, 0.25);
        assert_eq!(config.wall, WallConfig::default());

        let text = config.to_json_string().unwrap();
        assert_eq!(EngineConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        assert!(EngineConfig::from_json_str("{ snap: ").is_err());
    }
}
