//! Emotion-to-animation mapping.
//!
//! Pure lookup from an emotion label plus intensity to a named animation
//! clip for the 3D client. Total over all inputs: unknown labels fall back
//! to the neutral idle clip and the function never errors.

/// Animation played when no better mapping exists.
pub const IDLE_NEUTRAL: &str = "Idle_Neutral";

/// Maps an emotion label and intensity to an animation clip name.
///
/// The label is matched case-insensitively. Intensity only disambiguates
/// `joy` (below 0.7 is a contented idle, at or above it a laugh); every
/// other emotion maps 1:1 regardless of intensity.
pub fn map_emotion_to_animation(emotion: &str, intensity: f32) -> &'static str {
    match emotion.to_ascii_lowercase().as_str() {
        "joy" => {
            if intensity < 0.7 {
                "Idle_Happy"
            } else {
                "Laugh"
            }
        }
        "sadness" => "Idle_Sad",
        "agreement" => "Nod_Head_Yes",
        "surprise" => "Look_Around_Surprised",
        "anger" => "Shake_Head_No",
        "curiosity" | "thoughtful" => "Thinking_Pose",
        _ => IDLE_NEUTRAL,
    }
}
