// ABOUTME: Transform stage: staged raw payloads to normalized entities

pub mod entity;
pub mod stage;
pub mod transformer;

pub use entity::{Finding, RefTarget, TransformedEntity};
pub use stage::{TransformStage, TransformStats};
pub use transformer::{extract_modified_at, transform_record};
