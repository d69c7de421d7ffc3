//! 交换文档结构
//!
//! 导出/导入使用的 JSON 结构，点坐标写作 `{x, y, z}`：
//!
//! ```text
//! { "version": "1.0",
//!   "walls": [{id, start, end, thickness, height, material, wallType, openings}],
//!   "entities": [{id, type, ...}],
//!   "constraints": [{id, type, entities, parameters, priority, enabled, name}] }
//! ```
//!
//! 导入时先完整校验并转换，全部通过后才交给引擎。
//! 结构错误（未知类型、重复或为零的ID、缺失或非法的参数、非有限坐标）拒绝整个文档；
//! 孤立约束和实体数量不符的约束照常导入，由 `validate()` 报告。

use crate::error::FileError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use zdraft_core::constraint::{Constraint, ConstraintId, ConstraintKind};
use zdraft_core::entity::{Entity, EntityGeometry, EntityId};
use zdraft_core::math::Point3;
use zdraft_core::wall::{Opening, WallConfig, WallId, WallSegment, WallType};

/// 当前文档格式版本
pub const FORMAT_VERSION: &str = "1.0";

/// 支持的主版本号
const SUPPORTED_MAJOR: &str = "1";

fn default_version() -> String {
    FORMAT_VERSION.to_string()
}

fn default_enabled() -> bool {
    true
}

/// 点坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl PointRecord {
    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    fn to_point(self) -> Point3 {
        Point3::new(self.x, self.y, self.z)
    }
}

impl From<Point3> for PointRecord {
    fn from(p: Point3) -> Self {
        Self {
            x: p.x,
            y: p.y,
            z: p.z,
        }
    }
}

/// 墙体记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WallRecord {
    pub id: u64,
    pub start: PointRecord,
    pub end: PointRecord,
    pub thickness: f64,
    pub height: f64,
    pub material: String,
    pub wall_type: WallType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub openings: Vec<Opening>,
}

impl From<&WallSegment> for WallRecord {
    fn from(wall: &WallSegment) -> Self {
        Self {
            id: wall.id.0,
            start: wall.start.into(),
            end: wall.end.into(),
            thickness: wall.thickness,
            height: wall.height,
            material: wall.material.clone(),
            wall_type: wall.wall_type,
            openings: wall.openings.clone(),
        }
    }
}

/// 实体几何记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GeometryRecord {
    Point {
        position: PointRecord,
    },
    Line {
        start: PointRecord,
        end: PointRecord,
    },
    #[serde(rename_all = "camelCase")]
    Arc {
        center: PointRecord,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
    Circle {
        center: PointRecord,
        radius: f64,
    },
}

impl From<&EntityGeometry> for GeometryRecord {
    fn from(geometry: &EntityGeometry) -> Self {
        match geometry {
            EntityGeometry::Point { position } => GeometryRecord::Point {
                position: (*position).into(),
            },
            EntityGeometry::Line { start, end } => GeometryRecord::Line {
                start: (*start).into(),
                end: (*end).into(),
            },
            EntityGeometry::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => GeometryRecord::Arc {
                center: (*center).into(),
                radius: *radius,
                start_angle: *start_angle,
                end_angle: *end_angle,
            },
            EntityGeometry::Circle { center, radius } => GeometryRecord::Circle {
                center: (*center).into(),
                radius: *radius,
            },
        }
    }
}

/// 实体记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: u64,
    #[serde(flatten)]
    pub geometry: GeometryRecord,
}

impl From<&Entity> for EntityRecord {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id.0,
            geometry: (&entity.geometry).into(),
        }
    }
}

/// 约束记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintRecord {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub entities: Vec<u64>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

fn point_value(p: &Point3) -> Value {
    let mut map = Map::new();
    map.insert("x".to_string(), Value::from(p.x));
    map.insert("y".to_string(), Value::from(p.y));
    map.insert("z".to_string(), Value::from(p.z));
    Value::Object(map)
}

impl From<&Constraint> for ConstraintRecord {
    fn from(constraint: &Constraint) -> Self {
        let mut parameters = Map::new();
        match &constraint.kind {
            ConstraintKind::Distance { distance } => {
                parameters.insert("distance".to_string(), Value::from(*distance));
            }
            ConstraintKind::Angle { degrees } => {
                parameters.insert("angle".to_string(), Value::from(*degrees));
            }
            ConstraintKind::Fixed { anchors } => {
                parameters.insert(
                    "anchors".to_string(),
                    Value::Array(anchors.iter().map(point_value).collect()),
                );
            }
            ConstraintKind::Parallel | ConstraintKind::Perpendicular | ConstraintKind::Coincident => {}
        }

        Self {
            id: constraint.id.0,
            kind: constraint.kind.name().to_string(),
            entities: constraint.entity_ids.iter().map(|id| id.0).collect(),
            parameters,
            priority: constraint.priority,
            enabled: constraint.enabled,
            name: constraint.name.clone(),
        }
    }
}

/// 交换文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub walls: Vec<WallRecord>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub constraints: Vec<ConstraintRecord>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            version: default_version(),
            walls: Vec::new(),
            entities: Vec::new(),
            constraints: Vec::new(),
        }
    }
}

/// 校验通过、可直接替换引擎内容的数据
#[derive(Debug, Clone)]
pub struct Contents {
    pub walls: Vec<WallSegment>,
    pub entities: Vec<Entity>,
    pub constraints: Vec<Constraint>,
}

fn invalid(message: impl Into<String>) -> FileError {
    FileError::InvalidImportFormat(message.into())
}

fn finite_point(record: &PointRecord, what: &str) -> Result<Point3, FileError> {
    if record.is_finite() {
        Ok(record.to_point())
    } else {
        Err(invalid(format!("{} has a non-finite coordinate", what)))
    }
}

fn number_parameter(record: &ConstraintRecord, key: &str) -> Result<f64, FileError> {
    record
        .parameters
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            invalid(format!(
                "constraint {} ({}) requires a finite numeric `{}` parameter",
                record.id, record.kind, key
            ))
        })
}

impl Document {
    /// 校验并转换为引擎数据，任何问题都返回错误且不产生部分结果
    pub fn into_contents(self, config: &WallConfig) -> Result<Contents, FileError> {
        let major = self.version.split('.').next().unwrap_or_default();
        if major != SUPPORTED_MAJOR {
            return Err(FileError::UnsupportedVersion(format!(
                "Document version {} is not supported (expected {}.x)",
                self.version, SUPPORTED_MAJOR
            )));
        }

        let walls = convert_walls(self.walls, config)?;
        let entities = convert_entities(self.entities)?;
        let constraints = convert_constraints(self.constraints, &entities)?;

        Ok(Contents {
            walls,
            entities: entities.into_values().collect(),
            constraints,
        })
    }
}

fn convert_walls(records: Vec<WallRecord>, config: &WallConfig) -> Result<Vec<WallSegment>, FileError> {
    let mut seen = BTreeSet::new();
    let mut opening_ids = BTreeSet::new();
    let mut walls = Vec::with_capacity(records.len());

    for record in records {
        if record.id == 0 || !seen.insert(record.id) {
            return Err(invalid(format!("wall id {} is zero or duplicated", record.id)));
        }
        let what = format!("wall {}", record.id);
        let start = finite_point(&record.start, &what)?;
        let end = finite_point(&record.end, &what)?;

        if !(record.thickness.is_finite() && record.thickness > 0.0)
            || !(record.height.is_finite() && record.height > 0.0)
        {
            return Err(invalid(format!(
                "wall {} must have positive thickness and height",
                record.id
            )));
        }

        let mut wall = WallSegment::new(WallId(record.id), start, end, config);
        if !config.accepts_length(wall.length()) {
            return Err(invalid(format!(
                "wall {} length {:.3} is outside [{}, {}]",
                record.id,
                wall.length(),
                config.min_wall_length,
                config.max_wall_length
            )));
        }
        wall.thickness = record.thickness;
        wall.height = record.height;
        wall.material = record.material;
        wall.wall_type = record.wall_type;

        for opening in record.openings {
            if opening.id.0 == 0 || !opening_ids.insert(opening.id) {
                return Err(invalid(format!(
                    "opening id {} on wall {} is zero or duplicated",
                    opening.id.0, record.id
                )));
            }
            wall.add_opening(opening).map_err(|e| invalid(e.to_string()))?;
        }

        walls.push(wall);
    }

    Ok(walls)
}

fn convert_entities(records: Vec<EntityRecord>) -> Result<BTreeMap<EntityId, Entity>, FileError> {
    let mut entities = BTreeMap::new();

    for record in records {
        let id = EntityId(record.id);
        if record.id == 0 || entities.contains_key(&id) {
            return Err(invalid(format!("entity id {} is zero or duplicated", record.id)));
        }
        let what = format!("entity {}", record.id);

        let geometry = match record.geometry {
            GeometryRecord::Point { position } => EntityGeometry::Point {
                position: finite_point(&position, &what)?,
            },
            GeometryRecord::Line { start, end } => EntityGeometry::Line {
                start: finite_point(&start, &what)?,
                end: finite_point(&end, &what)?,
            },
            GeometryRecord::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => {
                if !(start_angle.is_finite() && end_angle.is_finite()) {
                    return Err(invalid(format!("{} has non-finite angles", what)));
                }
                EntityGeometry::Arc {
                    center: finite_point(&center, &what)?,
                    radius: finite_radius(radius, &what)?,
                    start_angle,
                    end_angle,
                }
            }
            GeometryRecord::Circle { center, radius } => EntityGeometry::Circle {
                center: finite_point(&center, &what)?,
                radius: finite_radius(radius, &what)?,
            },
        };

        entities.insert(id, Entity::new(id, geometry));
    }

    Ok(entities)
}

fn finite_radius(radius: f64, what: &str) -> Result<f64, FileError> {
    if radius.is_finite() {
        Ok(radius)
    } else {
        Err(invalid(format!("{} has a non-finite radius", what)))
    }
}

fn convert_constraints(
    records: Vec<ConstraintRecord>,
    entities: &BTreeMap<EntityId, Entity>,
) -> Result<Vec<Constraint>, FileError> {
    let mut seen = BTreeSet::new();
    let mut constraints = Vec::with_capacity(records.len());

    for record in records {
        if record.id == 0 || !seen.insert(record.id) {
            return Err(invalid(format!(
                "constraint id {} is zero or duplicated",
                record.id
            )));
        }

        let entity_ids: Vec<EntityId> = record.entities.iter().map(|id| EntityId(*id)).collect();
        if let Some(missing) = entity_ids.iter().find(|id| !entities.contains_key(id)) {
            tracing::debug!(
                "Constraint {} references missing {}, kept as orphan",
                record.id,
                missing
            );
        }

        let kind = match record.kind.as_str() {
            "distance" => ConstraintKind::Distance {
                distance: number_parameter(&record, "distance")?,
            },
            "angle" => ConstraintKind::Angle {
                degrees: number_parameter(&record, "angle")?,
            },
            "parallel" => ConstraintKind::Parallel,
            "perpendicular" => ConstraintKind::Perpendicular,
            "coincident" => ConstraintKind::Coincident,
            "fixed" => ConstraintKind::Fixed {
                anchors: fixed_anchors(&record, &entity_ids, entities)?,
            },
            other => {
                return Err(invalid(format!(
                    "constraint {} has unknown type `{}`",
                    record.id, other
                )))
            }
        };

        let mut constraint = Constraint::new(kind, entity_ids)
            .with_priority(record.priority)
            .with_name(record.name);
        constraint.id = ConstraintId(record.id);
        constraint.set_enabled(record.enabled);
        constraints.push(constraint);
    }

    Ok(constraints)
}

/// 固定约束的锚点，缺省时取实体当前控制点
fn fixed_anchors(
    record: &ConstraintRecord,
    entity_ids: &[EntityId],
    entities: &BTreeMap<EntityId, Entity>,
) -> Result<Vec<Point3>, FileError> {
    if let Some(value) = record.parameters.get("anchors") {
        let points: Vec<PointRecord> = serde_json::from_value(value.clone()).map_err(|e| {
            invalid(format!("constraint {} has malformed anchors: {}", record.id, e))
        })?;
        let what = format!("constraint {}", record.id);
        return points.iter().map(|p| finite_point(p, &what)).collect();
    }

    Ok(entity_ids
        .first()
        .and_then(|id| entities.get(id))
        .map(|entity| entity.geometry.control_points())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_document() {
        let json = r#"{
            "walls": [{
                "id": 1,
                "start": {"x": 0, "y": 0, "z": 0},
                "end": {"x": 4, "y": 0},
                "thickness": 0.2,
                "height": 2.7,
                "material": "brick",
                "wallType": "interior"
            }],
            "entities": [
                {"id": 1, "type": "point", "position": {"x": 0, "y": 0}},
                {"id": 2, "type": "line", "start": {"x": 0, "y": 1}, "end": {"x": 3, "y": 1}},
                {"id": 3, "type": "arc", "center": {"x": 0, "y": 0}, "radius": 2,
                 "startAngle": 0, "endAngle": 1.5}
            ],
            "constraints": [
                {"id": 7, "type": "distance", "entities": [1, 2], "parameters": {"distance": 1.5}},
                {"id": 8, "type": "fixed", "entities": [1]}
            ]
        }"#;

        let document: Document = serde_json::from_str(json).unwrap();
        assert_eq!(document.version, FORMAT_VERSION);

        let contents = document.into_contents(&WallConfig::default()).unwrap();
        assert_eq!(contents.walls.len(), 1);
        assert_eq!(contents.walls[0].material, "brick");
        assert_eq!(contents.walls[0].wall_type, WallType::Interior);
        assert_eq!(contents.entities.len(), 3);

        let distance = &contents.constraints[0];
        assert_eq!(distance.id, ConstraintId(7));
        assert_eq!(distance.kind, ConstraintKind::Distance { distance: 1.5 });
        assert!(distance.enabled);

        // 缺省锚点取实体当前位置
        assert_eq!(
            contents.constraints[1].kind,
            ConstraintKind::Fixed {
                anchors: vec![Point3::origin()]
            }
        );
    }

    #[test]
    fn test_constraint_record_parameters() {
        let constraint = Constraint::new(ConstraintKind::Angle { degrees: 30.0 }, vec![
            EntityId(1),
            EntityId(2),
        ]);
        let record = ConstraintRecord::from(&constraint);
        assert_eq!(record.kind, "angle");
        assert_eq!(record.parameters.get("angle"), Some(&Value::from(30.0)));
        assert_eq!(record.entities, vec![1, 2]);
    }

    fn document_with(json: &str) -> Document {
        serde_json::from_str(json).unwrap()
    }

    fn rejection(document: Document) -> String {
        match document.into_contents(&WallConfig::default()) {
            Err(FileError::InvalidImportFormat(message)) => message,
            other => panic!("expected InvalidImportFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let message = rejection(document_with(
            r#"{"entities": [
                {"id": 1, "type": "point", "position": {"x": 0, "y": 0}},
                {"id": 1, "type": "point", "position": {"x": 1, "y": 0}}
            ]}"#,
        ));
        assert!(message.contains("entity id 1"));
    }

    #[test]
    fn test_rejects_short_wall() {
        let message = rejection(document_with(
            r#"{"walls": [{"id": 1, "start": {"x": 0, "y": 0}, "end": {"x": 0, "y": 0.05},
                "thickness": 0.2, "height": 2.7, "material": "concrete", "wallType": "exterior"}]}"#,
        ));
        assert!(message.contains("length"));
    }

    #[test]
    fn test_rejects_bad_constraints() {
        let entities = r#"[{"id": 1, "type": "point", "position": {"x": 0, "y": 0}}]"#;

        let duplicate = rejection(document_with(&format!(
            r#"{{"entities": {}, "constraints": [
                {{"id": 2, "type": "coincident", "entities": [1, 1]}},
                {{"id": 2, "type": "coincident", "entities": [1, 1]}}]}}"#,
            entities
        )));
        assert!(duplicate.contains("constraint id 2"));

        let unknown = rejection(document_with(&format!(
            r#"{{"entities": {}, "constraints": [{{"id": 1, "type": "tangent", "entities": [1]}}]}}"#,
            entities
        )));
        assert!(unknown.contains("tangent"));

        let parameter = rejection(document_with(&format!(
            r#"{{"entities": {}, "constraints": [{{"id": 1, "type": "distance", "entities": [1]}}]}}"#,
            entities
        )));
        assert!(parameter.contains("distance"));
    }

    #[test]
    fn test_keeps_orphaned_and_wrong_arity_constraints() {
        let document = document_with(
            r#"{"entities": [{"id": 1, "type": "point", "position": {"x": 0, "y": 0}}],
                "constraints": [
                    {"id": 1, "type": "distance", "entities": [1, 9], "parameters": {"distance": 1}},
                    {"id": 2, "type": "parallel", "entities": [1]},
                    {"id": 3, "type": "fixed", "entities": [9]}
                ]}"#,
        );
        let contents = document.into_contents(&WallConfig::default()).unwrap();
        assert_eq!(contents.constraints.len(), 3);
        assert_eq!(contents.constraints[0].entity_ids, vec![EntityId(1), EntityId(9)]);
        assert!(!contents.constraints[1].is_valid());

        // 实体缺失且未给锚点时锚点为空
        assert_eq!(
            contents.constraints[2].kind,
            ConstraintKind::Fixed { anchors: vec![] }
        );
    }

    #[test]
    fn test_accepts_any_finite_radius() {
        let contents = document_with(
            r#"{"entities": [{"id": 1, "type": "circle", "center": {"x": 0, "y": 0}, "radius": 0}]}"#,
        )
        .into_contents(&WallConfig::default())
        .unwrap();
        assert_eq!(contents.entities.len(), 1);
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let result = document_with(r#"{"version": "2.0"}"#).into_contents(&WallConfig::default());
        assert!(matches!(result, Err(FileError::UnsupportedVersion(_))));
    }
}
