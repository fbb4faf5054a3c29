//! Transform specification types and validation.
//!
//! A transform spec is an ordered list of `{type, parameters}` steps.  The
//! orchestrator never interprets the steps; it only checks their shape
//! before any job record is created and forwards them to a node verbatim.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of transform steps a single job may carry.
pub const MAX_TRANSFORM_STEPS: usize = 50;

/// Maximum length of a transform type identifier.
const MAX_TYPE_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One step of a transform spec, e.g. `{"type": "resize", "parameters": {"width": 800}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStep {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_parameters")]
    pub parameters: serde_json::Value,
}

fn empty_parameters() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl TransformStep {
    pub fn new(kind: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            parameters,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate the transform spec of one job.
///
/// Rules:
/// - Between 1 and `MAX_TRANSFORM_STEPS` steps.
/// - Every step has a non-empty `type` of at most `MAX_TYPE_LEN` characters.
/// - `parameters` is a JSON object.
///
/// `label` identifies the job in error messages (usually the original filename).
pub fn validate_transform_spec(label: &str, steps: &[TransformStep]) -> Result<(), CoreError> {
    if steps.is_empty() {
        return Err(CoreError::Validation(format!(
            "'{label}' must have at least one transform"
        )));
    }
    if steps.len() > MAX_TRANSFORM_STEPS {
        return Err(CoreError::Validation(format!(
            "'{label}' exceeds the maximum of {MAX_TRANSFORM_STEPS} transforms"
        )));
    }

    for (i, step) in steps.iter().enumerate() {
        let kind = step.kind.trim();
        if kind.is_empty() {
            return Err(CoreError::Validation(format!(
                "'{label}' - transform {i} must have a non-empty 'type'"
            )));
        }
        if kind.len() > MAX_TYPE_LEN {
            return Err(CoreError::Validation(format!(
                "'{label}' - transform {i}: 'type' exceeds {MAX_TYPE_LEN} characters"
            )));
        }
        if !step.parameters.is_object() {
            return Err(CoreError::Validation(format!(
                "'{label}' - transform {i}: 'parameters' must be an object"
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn resize() -> TransformStep {
        TransformStep::new("resize", json!({"width": 800, "height": 600}))
    }

    #[test]
    fn valid_spec_accepted() {
        let steps = vec![resize(), TransformStep::new("rotate", json!({"degrees": 90}))];
        assert!(validate_transform_spec("a.jpg", &steps).is_ok());
    }

    #[test]
    fn empty_spec_rejected() {
        assert!(validate_transform_spec("a.jpg", &[]).is_err());
    }

    #[test]
    fn too_many_steps_rejected() {
        let steps: Vec<_> = (0..MAX_TRANSFORM_STEPS + 1).map(|_| resize()).collect();
        assert!(validate_transform_spec("a.jpg", &steps).is_err());
    }

    #[test]
    fn max_steps_accepted() {
        let steps: Vec<_> = (0..MAX_TRANSFORM_STEPS).map(|_| resize()).collect();
        assert!(validate_transform_spec("a.jpg", &steps).is_ok());
    }

    #[test]
    fn blank_type_rejected() {
        let steps = vec![TransformStep::new("  ", json!({}))];
        let err = validate_transform_spec("a.jpg", &steps).unwrap_err();
        assert!(err.to_string().contains("transform 0"));
    }

    #[test]
    fn non_object_parameters_rejected() {
        let steps = vec![TransformStep::new("grayscale", json!([1, 2]))];
        assert!(validate_transform_spec("a.jpg", &steps).is_err());
    }

    #[test]
    fn missing_parameters_default_to_empty_object() {
        let step: TransformStep = serde_json::from_value(json!({"type": "grayscale"})).unwrap();
        assert_eq!(step.parameters, json!({}));
        assert!(validate_transform_spec("a.jpg", &[step]).is_ok());
    }

    #[test]
    fn step_serializes_type_field() {
        let value = serde_json::to_value(resize()).unwrap();
        assert_eq!(value["type"], "resize");
        assert_eq!(value["parameters"]["width"], 800);
    }
}
