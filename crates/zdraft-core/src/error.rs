//! 核心错误定义

use crate::constraint::ConstraintId;
use crate::entity::{EntityId, EntityKind};
use crate::wall::WallId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Constraint not found: {0}")]
    ConstraintNotFound(ConstraintId),

    #[error("Wall not found: {0}")]
    WallNotFound(WallId),

    #[error("No wall chain is being drawn")]
    NotDrawing,

    #[error("Field `{field}` does not apply to {kind:?} entities")]
    InvalidPatch { field: &'static str, kind: EntityKind },

    #[error("Wall length {length:.3} is outside [{min}, {max}]")]
    InvalidWallLength { length: f64, min: f64, max: f64 },

    #[error("`{field}` must be positive and finite, got {value}")]
    InvalidDimension { field: &'static str, value: f64 },

    #[error("Invalid opening on {wall}: {reason}")]
    InvalidOpening { wall: WallId, reason: String },
}
