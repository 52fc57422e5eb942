use crate::error::PipelineError;
use crate::pipeline::slicing::GridConfig;
use crate::pipeline::types::ConfidenceTiers;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIDENCE: f32 = 0.15;
pub const DEFAULT_BOX_THICKNESS: u32 = 2;

/// Everything that shapes a run apart from the input path and the detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub grid: GridConfig,
    /// Threshold used when a run does not supply its own
    pub confidence: f32,
    pub tiers: ConfidenceTiers,
    /// Outline width of drawn boxes in pixels
    pub thickness: u32,
    /// IoU above which overlapping frame-space boxes are merged.
    /// `None` keeps every per-tile box, including duplicates at tile seams.
    #[serde(default)]
    pub nms_iou: Option<f32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            confidence: DEFAULT_CONFIDENCE,
            tiers: ConfidenceTiers::default(),
            thickness: DEFAULT_BOX_THICKNESS,
            nms_iou: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.grid.columns == 0 || self.grid.rows == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "grid must have at least one column and row, got {}x{}",
                self.grid.columns, self.grid.rows
            )));
        }
        validate_confidence(self.confidence)?;
        if !(0.0..=1.0).contains(&self.tiers.medium)
            || !(0.0..=1.0).contains(&self.tiers.high)
            || self.tiers.medium > self.tiers.high
        {
            return Err(PipelineError::InvalidConfig(format!(
                "tier thresholds must satisfy 0 <= medium <= high <= 1, got medium={} high={}",
                self.tiers.medium, self.tiers.high
            )));
        }
        if self.thickness == 0 {
            return Err(PipelineError::InvalidConfig(
                "box thickness must be at least 1 pixel".to_string(),
            ));
        }
        if let Some(iou) = self.nms_iou {
            if !(0.0..=1.0).contains(&iou) {
                return Err(PipelineError::InvalidConfig(format!(
                    "nms IoU threshold must be within [0, 1], got {}",
                    iou
                )));
            }
        }
        Ok(())
    }
}

pub fn validate_confidence(confidence: f32) -> Result<(), PipelineError> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "confidence threshold must be within [0, 1], got {}",
            confidence
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grid.columns, 3);
        assert_eq!(config.grid.rows, 3);
        assert_eq!(config.thickness, 2);
        assert!(config.nms_iou.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.grid.columns = 0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));

        let mut config = PipelineConfig::default();
        config.confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.tiers.medium = 0.6;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.nms_iou = Some(-0.1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_round_trip_keeps_optional_nms() {
        let json = r#"{
            "grid": {"columns": 2, "rows": 4, "remainder": "extend_edges"},
            "confidence": 0.2,
            "tiers": {"high": 0.4, "medium": 0.25, "high_color": [0,255,0],
                      "medium_color": [255,165,0], "low_color": [255,0,0]},
            "thickness": 3
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.grid.columns, 2);
        assert_eq!(config.grid.rows, 4);
        assert_eq!(config.thickness, 3);
        assert!(config.nms_iou.is_none());
    }
}
