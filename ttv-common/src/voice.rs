//! Voice catalog record
//!
//! The catalog itself lives with the UI layer; this is the shape of the
//! records it hands to the audio core and the mock synthesis function.

use serde::{Deserialize, Serialize};

/// Quality tier advertised for a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Standard,
    Premium,
    Cloned,
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityTier::Standard => write!(f, "standard"),
            QualityTier::Premium => write!(f, "premium"),
            QualityTier::Cloned => write!(f, "cloned"),
        }
    }
}

/// A selectable voice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceProfile {
    pub id: String,
    pub name: String,
    pub category: String,
    pub quality_tier: QualityTier,
}

impl VoiceProfile {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        quality_tier: QualityTier,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            quality_tier,
        }
    }

    /// Playback id used when previewing this voice
    pub fn preview_session_id(&self) -> String {
        format!("preview-{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_profile_serializes_camel_case() {
        let voice = VoiceProfile::new("aria", "Aria", "narration", QualityTier::Premium);
        let json = serde_json::to_string(&voice).unwrap();
        assert!(json.contains("\"qualityTier\":\"premium\""));

        let back: VoiceProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, voice);
    }

    #[test]
    fn test_preview_session_id() {
        let voice = VoiceProfile::new("x", "X", "c", QualityTier::Standard);
        assert_eq!(voice.preview_session_id(), "preview-x");
    }
}
