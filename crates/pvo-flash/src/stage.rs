use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashStage {
    Init,
    Preflight,
    Download,
    Verify,
    Upload,
    Postcheck,
    Complete,
    Failed,
}

impl FlashStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashStage::Init => "init",
            FlashStage::Preflight => "preflight",
            FlashStage::Download => "download",
            FlashStage::Verify => "verify",
            FlashStage::Upload => "upload",
            FlashStage::Postcheck => "postcheck",
            FlashStage::Complete => "complete",
            FlashStage::Failed => "failed",
        }
    }

    /// Percentage published when the stage is entered.
    pub fn entry_pct(&self) -> u8 {
        match self {
            FlashStage::Init | FlashStage::Failed => 0,
            FlashStage::Preflight => 10,
            FlashStage::Download | FlashStage::Upload => 30,
            FlashStage::Verify => 50,
            FlashStage::Postcheck => 85,
            FlashStage::Complete => 100,
        }
    }

    /// OTA progress 0..=100 mapped onto 30..=80.
    pub fn upload_pct(ota_pct: u8) -> u8 {
        30 + ota_pct.min(100) / 2
    }

    /// Monitor progress 0..=100 mapped onto 85..=95.
    pub fn postcheck_pct(monitor_pct: u8) -> u8 {
        85 + monitor_pct.min(100) / 10
    }
}

/// Published on every stage transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashStageEvent {
    pub stage: FlashStage,
    #[serde(rename = "progress")]
    pub progress_pct: u8,
    pub version: Option<String>,
    pub target_device: String,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_clamped() {
        assert_eq!(FlashStage::upload_pct(0), 30);
        assert_eq!(FlashStage::upload_pct(55), 57);
        assert_eq!(FlashStage::upload_pct(100), 80);
        assert_eq!(FlashStage::upload_pct(250), 80);
        assert_eq!(FlashStage::postcheck_pct(0), 85);
        assert_eq!(FlashStage::postcheck_pct(100), 95);
    }

    #[test]
    fn event_serializes_with_progress_key() {
        let ev = FlashStageEvent {
            stage: FlashStage::Verify,
            progress_pct: 50,
            version: Some("1.4.0".to_string()),
            target_device: "edge_haus_01".to_string(),
            error: None,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["stage"], "verify");
        assert_eq!(v["progress"], 50);
        assert!(v["error"].is_null());
    }
}
