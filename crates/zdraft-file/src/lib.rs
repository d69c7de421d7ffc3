//! ZDraft 文件格式处理
//!
//! 墙体、约束实体和约束的 JSON 导出/导入。
//! 导入整体替换引擎内容，不做合并；校验失败时引擎保持不变。

pub mod document;
pub mod error;

pub use document::{Document, FORMAT_VERSION};
pub use error::FileError;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use zdraft_core::engine::DraftingEngine;

/// 导出引擎内容
pub fn export(engine: &DraftingEngine) -> Document {
    Document {
        version: FORMAT_VERSION.to_string(),
        walls: engine.drawer().walls().map(Into::into).collect(),
        entities: engine.store().entities().map(Into::into).collect(),
        constraints: engine.store().constraints().map(Into::into).collect(),
    }
}

/// 导出为格式化的 JSON 文本
pub fn to_json(engine: &DraftingEngine) -> Result<String, FileError> {
    Ok(serde_json::to_string_pretty(&export(engine))?)
}

/// 从 JSON 文本导入，替换引擎中的全部墙体、实体和约束
pub fn import(engine: &mut DraftingEngine, json: &str) -> Result<(), FileError> {
    let document: Document = serde_json::from_str(json)
        .map_err(|e| FileError::InvalidImportFormat(e.to_string()))?;
    let contents = document.into_contents(&engine.config().wall)?;

    tracing::info!(
        "Imported {} walls, {} entities, {} constraints",
        contents.walls.len(),
        contents.entities.len(),
        contents.constraints.len()
    );

    engine.replace_contents(contents.walls, contents.entities, contents.constraints);
    Ok(())
}

/// 保存到文件
pub fn save(engine: &DraftingEngine, path: &Path) -> Result<(), FileError> {
    let json = to_json(engine)?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(json.as_bytes())?;
    writer.flush()?;

    tracing::info!(
        "Saved {} walls, {} entities, {} constraints to {} ({} bytes)",
        engine.drawer().wall_count(),
        engine.store().entity_count(),
        engine.store().constraint_count(),
        path.display(),
        json.len()
    );

    Ok(())
}

/// 从文件加载
pub fn load(engine: &mut DraftingEngine, path: &Path) -> Result<(), FileError> {
    let json = std::fs::read_to_string(path)?;
    import(engine, &json)?;

    tracing::info!("Loaded {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zdraft_core::prelude::*;

    fn populated_engine() -> DraftingEngine {
        let mut engine = DraftingEngine::default();

        let walls = engine
            .drawer_mut()
            .create_room(Point2::new(0.0, 0.0), 4.0, 3.0, None)
            .unwrap();
        engine
            .drawer_mut()
            .add_opening(walls[0], OpeningSpec::new(OpeningKind::Door, 1.0))
            .unwrap();

        let store = engine.store_mut();
        let p = store.create_entity(EntityGeometry::Point {
            position: Point3::new(0.5, 0.5, 0.0),
        });
        let l1 = store.create_entity(EntityGeometry::Line {
            start: Point3::new(0.0, 0.0, 0.0),
            end: Point3::new(2.0, 0.0, 0.0),
        });
        let l2 = store.create_entity(EntityGeometry::Line {
            start: Point3::new(0.0, 1.0, 0.0),
            end: Point3::new(2.0, 1.5, 0.0),
        });
        store.create_entity(EntityGeometry::Arc {
            center: Point3::new(1.0, 1.0, 0.0),
            radius: 0.5,
            start_angle: 0.0,
            end_angle: 1.5,
        });
        store.create_entity(EntityGeometry::Circle {
            center: Point3::new(3.0, 3.0, 0.0),
            radius: 0.25,
        });

        store.add_constraint(constraints::distance(p.id, l1.id, 0.5).with_priority(2));
        store.add_constraint(constraints::parallel(l1.id, l2.id));
        store.add_constraint(constraints::angle(l1.id, l2.id, 15.0));
        store.add_constraint(constraints::fixed(l1.id));

        engine
    }

    #[test]
    fn test_roundtrip() {
        let engine = populated_engine();
        let json = to_json(&engine).unwrap();

        let mut restored = DraftingEngine::default();
        import(&mut restored, &json).unwrap();

        let original_walls: Vec<_> = engine.drawer().walls().cloned().collect();
        let restored_walls: Vec<_> = restored.drawer().walls().cloned().collect();
        assert_eq!(original_walls, restored_walls);

        let original: Vec<_> = engine
            .store()
            .entities()
            .map(|e| (e.id, e.geometry.clone()))
            .collect();
        let loaded: Vec<_> = restored
            .store()
            .entities()
            .map(|e| (e.id, e.geometry.clone()))
            .collect();
        assert_eq!(original, loaded);

        let original: Vec<_> = engine.store().constraints().cloned().collect();
        let loaded: Vec<_> = restored.store().constraints().cloned().collect();
        assert_eq!(original, loaded);

        // 再次导出结果一致
        assert_eq!(export(&restored), export(&engine));
    }

    /// 约束中不随求解变化的字段
    fn stable_fields(engine: &DraftingEngine) -> Vec<(ConstraintId, ConstraintKind, Vec<EntityId>, i32, bool, String)> {
        engine
            .store()
            .constraints()
            .map(|c| {
                (
                    c.id,
                    c.kind.clone(),
                    c.entity_ids.clone(),
                    c.priority,
                    c.enabled,
                    c.name.clone(),
                )
            })
            .collect()
    }

    fn reimport(engine: &DraftingEngine) -> DraftingEngine {
        let mut restored = DraftingEngine::default();
        import(&mut restored, &to_json(engine).unwrap()).unwrap();
        restored
    }

    #[test]
    fn test_orphaned_constraint_survives_save_load() {
        let mut engine = DraftingEngine::default();
        let store = engine.store_mut();
        let a = store.create_entity(EntityGeometry::Point {
            position: Point3::new(0.0, 0.0, 0.0),
        });
        let b = store.create_entity(EntityGeometry::Point {
            position: Point3::new(3.0, 0.0, 0.0),
        });
        let c = store.add_constraint(constraints::distance(a.id, b.id, 2.0));
        assert!(store.delete_entity(b.id));

        let file_path = std::env::temp_dir().join("zdraft_test_orphan.json");
        save(&engine, &file_path).unwrap();
        let mut loaded = DraftingEngine::default();
        load(&mut loaded, &file_path).unwrap();
        std::fs::remove_file(&file_path).ok();

        assert_eq!(stable_fields(&loaded), stable_fields(&engine));
        let report = loaded.store().validate();
        assert!(!report.valid);
        assert_eq!(
            report.issues,
            vec![ValidationIssue::OrphanedConstraint {
                constraint: c.id,
                missing: b.id,
            }]
        );

        // 已删除实体的ID不会被新实体复用
        let next = loaded.store_mut().create_entity(EntityGeometry::Point {
            position: Point3::origin(),
        });
        assert_eq!(next.id, EntityId(3));
    }

    #[test]
    fn test_wrong_arity_constraint_roundtrip() {
        let mut engine = DraftingEngine::default();
        let store = engine.store_mut();
        let line = store.create_entity(EntityGeometry::Line {
            start: Point3::new(0.0, 0.0, 0.0),
            end: Point3::new(2.0, 0.0, 0.0),
        });
        store.create_constraint(ConstraintKind::Parallel, vec![line.id]);

        let restored = reimport(&engine);
        assert_eq!(stable_fields(&restored), stable_fields(&engine));
        assert!(matches!(
            restored.store().validate().issues.as_slice(),
            [ValidationIssue::WrongArity { actual: 1, .. }]
        ));
    }

    #[test]
    fn test_disabled_and_degenerate_roundtrip() {
        let mut engine = DraftingEngine::default();
        let store = engine.store_mut();
        let a = store.create_entity(EntityGeometry::Point {
            position: Point3::new(0.0, 0.0, 0.0),
        });
        let b = store.create_entity(EntityGeometry::Point {
            position: Point3::new(1.0, 0.0, 0.0),
        });
        // 创建接口不限制半径
        store.create_entity(EntityGeometry::Circle {
            center: Point3::origin(),
            radius: 0.0,
        });
        let c = store.create_constraint(ConstraintKind::Coincident, vec![a.id, b.id]);
        store
            .update_constraint(
                c.id,
                &ConstraintPatch {
                    enabled: Some(false),
                    ..ConstraintPatch::default()
                },
            )
            .unwrap();

        let restored = reimport(&engine);
        assert_eq!(stable_fields(&restored), stable_fields(&engine));
        assert!(!restored.store().constraint(c.id).unwrap().enabled);
        assert_eq!(restored.store().entity_count(), 3);
    }

    #[tokio::test]
    async fn test_roundtrip_after_solve() {
        let mut engine = populated_engine();
        let options = engine.config().solver.clone();
        engine.store_mut().solve(&options).await;
        assert!(engine.store().constraints().any(|c| c.satisfied));

        let restored = reimport(&engine);
        assert_eq!(stable_fields(&restored), stable_fields(&engine));

        for (solved, loaded) in engine.store().entities().zip(restored.store().entities()) {
            assert_eq!(solved.id, loaded.id);
            let pairs = solved
                .geometry
                .control_points()
                .into_iter()
                .zip(loaded.geometry.control_points());
            for (p, q) in pairs {
                assert!((p - q).norm() < 1e-9);
            }
        }
    }

    #[test]
    fn test_import_replaces_contents() {
        let mut engine = populated_engine();
        import(&mut engine, r#"{"walls": [], "entities": [], "constraints": []}"#).unwrap();

        assert_eq!(engine.drawer().wall_count(), 0);
        assert_eq!(engine.store().entity_count(), 0);
        assert_eq!(engine.store().constraint_count(), 0);
        assert!(engine.drawer().snap_index().points().is_empty());
    }

    #[test]
    fn test_invalid_import_leaves_engine_untouched() {
        let mut engine = populated_engine();
        let before = export(&engine);

        let json = r#"{
            "entities": [{"id": 1, "type": "point", "position": {"x": 0, "y": 0}}],
            "constraints": [{"id": 1, "type": "symmetric", "entities": [1, 2]}]
        }"#;
        let result = import(&mut engine, json);
        assert!(matches!(result, Err(FileError::InvalidImportFormat(_))));
        assert_eq!(export(&engine), before);

        let result = import(&mut engine, "{ not json");
        assert!(matches!(result, Err(FileError::InvalidImportFormat(_))));
        assert_eq!(export(&engine), before);
    }

    #[test]
    fn test_new_ids_continue_after_import() {
        let engine = populated_engine();
        let json = to_json(&engine).unwrap();

        let mut restored = DraftingEngine::default();
        import(&mut restored, &json).unwrap();

        let next = restored.store_mut().create_entity(EntityGeometry::Point {
            position: Point3::origin(),
        });
        assert_eq!(next.id, EntityId(6));
        assert!(restored.store().validate().valid);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let temp_dir = std::env::temp_dir();
        let file_path = temp_dir.join("zdraft_test_document.json");

        let engine = populated_engine();
        save(&engine, &file_path).expect("Failed to save");

        let mut loaded = DraftingEngine::default();
        load(&mut loaded, &file_path).expect("Failed to load");
        assert_eq!(export(&loaded), export(&engine));

        // 清理
        std::fs::remove_file(&file_path).ok();
    }

    #[test]
    fn test_load_missing_file() {
        let mut engine = DraftingEngine::default();
        let result = load(&mut engine, Path::new("/nonexistent/zdraft.json"));
        assert!(matches!(result, Err(FileError::Io(_))));
    }
}
