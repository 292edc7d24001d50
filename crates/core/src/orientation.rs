//! Orientation resolution: picks one of the two fixed output resolutions
//! from a prompt or from the pixel dimensions of uploaded media.
//!
//! Exactly one prompt policy is active per [`OrientationResolver`]. The
//! marker-token policy is the default; the keyword classifier must be
//! selected explicitly.

use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Resolution;

/// Default token that switches a prompt to landscape output.
pub const DEFAULT_LANDSCAPE_MARKER: &str = "#landscape";

/// Subjects that usually read better in a tall frame.
pub const PORTRAIT_KEYWORDS: &[&str] = &[
    "portrait",
    "vertical",
    "tall",
    "standing",
    "person",
    "human",
    "figure",
    "full body",
    "full-body",
    "character",
    "portrait shot",
    "close up",
    "face",
    "head",
    "bust",
    "torso",
    "selfie",
    "profile",
];

/// Subjects that usually read better in a wide frame.
pub const LANDSCAPE_KEYWORDS: &[&str] = &[
    "landscape",
    "horizontal",
    "wide",
    "panorama",
    "scenery",
    "nature",
    "cityscape",
    "street",
    "road",
    "beach",
    "mountain",
    "forest",
    "group",
    "crowd",
    "scene",
    "environment",
    "background",
    "setting",
];

/// How a prompt is mapped to an orientation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrientationPolicy {
    /// Landscape when the prompt contains `marker` (case-insensitive);
    /// the marker is removed from the prompt.
    MarkerToken { marker: String },
    /// Landscape when more landscape keywords than portrait keywords match.
    Keywords,
}

impl Default for OrientationPolicy {
    fn default() -> Self {
        OrientationPolicy::MarkerToken {
            marker: DEFAULT_LANDSCAPE_MARKER.to_string(),
        }
    }
}

impl FromStr for OrientationPolicy {
    type Err = CoreError;

    /// Parses the `ORIENTATION_POLICY` setting (`marker` or `keywords`).
    /// The marker policy gets the default token; use
    /// [`OrientationPolicy::MarkerToken`] directly for a custom one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "marker" | "marker_token" => Ok(OrientationPolicy::default()),
            "keywords" | "keyword" => Ok(OrientationPolicy::Keywords),
            other => Err(CoreError::Validation(format!(
                "Unknown orientation policy '{other}'. Valid policies: marker, keywords"
            ))),
        }
    }
}

/// Prompt text after orientation resolution, with the resolution it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrompt {
    pub prompt: String,
    pub resolution: Resolution,
}

/// A crop rectangle in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Applies an [`OrientationPolicy`] to prompts.
#[derive(Debug, Clone)]
pub struct OrientationResolver {
    policy: OrientationPolicy,
    marker: Option<Regex>,
}

impl OrientationResolver {
    pub fn new(policy: OrientationPolicy) -> Result<Self, CoreError> {
        let marker = match &policy {
            OrientationPolicy::MarkerToken { marker } => {
                let marker = marker.trim();
                if marker.is_empty() {
                    return Err(CoreError::Validation(
                        "Landscape marker token must not be empty".to_string(),
                    ));
                }
                let pattern = marker_pattern(marker);
                let re = Regex::new(&pattern)
                    .map_err(|e| CoreError::Validation(format!("Invalid marker token: {e}")))?;
                Some(re)
            }
            OrientationPolicy::Keywords => None,
        };

        Ok(Self { policy, marker })
    }

    pub fn policy(&self) -> &OrientationPolicy {
        &self.policy
    }

    /// Resolve orientation from the prompt alone.
    pub fn resolve_prompt(&self, prompt: &str) -> ResolvedPrompt {
        match &self.marker {
            Some(re) => {
                let (prompt, found) = strip_marker(re, prompt);
                let resolution = if found {
                    Resolution::LANDSCAPE
                } else {
                    Resolution::PORTRAIT
                };
                ResolvedPrompt { prompt, resolution }
            }
            None => ResolvedPrompt {
                prompt: prompt.to_string(),
                resolution: classify_keywords(prompt),
            },
        }
    }

    /// Resolve orientation for a request that may carry uploaded media.
    ///
    /// Media dimensions win over the prompt when present. The marker token
    /// is stripped from the prompt either way.
    pub fn resolve(&self, prompt: &str, media_dimensions: Option<(u32, u32)>) -> ResolvedPrompt {
        let resolved = self.resolve_prompt(prompt);
        match media_dimensions {
            Some((width, height)) => ResolvedPrompt {
                prompt: resolved.prompt,
                resolution: resolution_for_dimensions(width, height),
            },
            None => resolved,
        }
    }

    /// Remove the marker token from a prompt without deciding orientation.
    /// Used on every segment prompt once the request orientation is fixed.
    pub fn strip(&self, prompt: &str) -> String {
        match &self.marker {
            Some(re) => strip_marker(re, prompt).0,
            None => prompt.to_string(),
        }
    }

    /// Whether any of `prompts` carries the landscape marker.
    pub fn any_marked(&self, prompts: &[&str]) -> bool {
        match &self.marker {
            Some(re) => prompts.iter().any(|p| re.is_match(p)),
            None => false,
        }
    }
}

/// Case-insensitive match of `marker` as a whole token. The preceding
/// boundary character is captured so stripping can keep it.
fn marker_pattern(marker: &str) -> String {
    let ends_in_word = marker
        .chars()
        .last()
        .is_some_and(|c| c.is_alphanumeric() || c == '_');
    format!(
        r"(?i)(^|\W){}{}",
        regex::escape(marker),
        if ends_in_word { r"\b" } else { "" }
    )
}

fn strip_marker(re: &Regex, prompt: &str) -> (String, bool) {
    if !re.is_match(prompt) {
        return (prompt.to_string(), false);
    }
    let replaced = re.replace_all(prompt, "${1} ");
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    (collapsed, true)
}

/// Keyword classifier: counts portrait vs. landscape subject matches.
/// Ties (including no matches) resolve to portrait.
pub fn classify_keywords(prompt: &str) -> Resolution {
    let lower = prompt.to_lowercase();
    let portrait = PORTRAIT_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .count();
    let landscape = LANDSCAPE_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .count();

    if landscape > portrait {
        Resolution::LANDSCAPE
    } else {
        Resolution::PORTRAIT
    }
}

/// Landscape when strictly wider than tall, portrait otherwise.
pub fn resolution_for_dimensions(width: u32, height: u32) -> Resolution {
    if width > height {
        Resolution::LANDSCAPE
    } else {
        Resolution::PORTRAIT
    }
}

/// Largest centered rectangle of `source_w`x`source_h` with the aspect
/// ratio of `target`.
pub fn center_crop(source_w: u32, source_h: u32, target: Resolution) -> CropRect {
    let (sw, sh) = (source_w as u64, source_h as u64);
    let (tw, th) = (target.width as u64, target.height as u64);

    if sw * th > sh * tw {
        // Source is wider than the target box.
        let width = sh * tw / th;
        CropRect {
            x: ((sw - width) / 2) as u32,
            y: 0,
            width: width as u32,
            height: source_h,
        }
    } else {
        let height = sw * th / tw;
        CropRect {
            x: 0,
            y: ((sh - height) / 2) as u32,
            width: source_w,
            height: height as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker_resolver() -> OrientationResolver {
        OrientationResolver::new(OrientationPolicy::default()).unwrap()
    }

    // -- marker policy --

    #[test]
    fn marker_selects_landscape_and_is_stripped() {
        let resolved = marker_resolver().resolve_prompt("a dog running #landscape in a park");
        assert_eq!(resolved.resolution, Resolution::LANDSCAPE);
        assert_eq!(resolved.prompt, "a dog running in a park");
    }

    #[test]
    fn marker_is_case_insensitive() {
        let resolved = marker_resolver().resolve_prompt("#LandScape waves at sunset");
        assert_eq!(resolved.resolution, Resolution::LANDSCAPE);
        assert_eq!(resolved.prompt, "waves at sunset");
    }

    #[test]
    fn prompt_without_marker_is_portrait_and_unchanged() {
        let prompt = "a  woman   dancing  on a landscape";
        let resolved = marker_resolver().resolve_prompt(prompt);
        assert_eq!(resolved.resolution, Resolution::PORTRAIT);
        assert_eq!(resolved.prompt, prompt);
    }

    #[test]
    fn custom_marker_token() {
        let resolver = OrientationResolver::new(OrientationPolicy::MarkerToken {
            marker: "[wide]".into(),
        })
        .unwrap();
        let resolved = resolver.resolve_prompt("city at night [WIDE]");
        assert_eq!(resolved.resolution, Resolution::LANDSCAPE);
        assert_eq!(resolved.prompt, "city at night");
    }

    #[test]
    fn empty_marker_rejected() {
        let result = OrientationResolver::new(OrientationPolicy::MarkerToken {
            marker: "  ".into(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn marker_must_be_a_whole_token() {
        let resolver = marker_resolver();
        for prompt in ["#landscapes at dusk", "snow#landscape_mode", "a#landscapex"] {
            let resolved = resolver.resolve_prompt(prompt);
            assert_eq!(resolved.resolution, Resolution::PORTRAIT, "{prompt}");
            assert_eq!(resolved.prompt, prompt);
        }
        assert!(!resolver.any_marked(&["#landscapes at dusk"]));
    }

    #[test]
    fn marker_next_to_punctuation_still_counts() {
        let resolved = marker_resolver().resolve_prompt("waves (#landscape), golden hour");
        assert_eq!(resolved.resolution, Resolution::LANDSCAPE);
        assert_eq!(resolved.prompt, "waves ( ), golden hour");
    }

    #[test]
    fn marker_only_prompt_becomes_empty() {
        let resolved = marker_resolver().resolve_prompt("#landscape");
        assert_eq!(resolved.resolution, Resolution::LANDSCAPE);
        assert!(resolved.prompt.is_empty());
    }

    // -- keyword policy --

    #[test]
    fn keywords_landscape_majority() {
        assert_eq!(
            classify_keywords("a wide mountain road through the forest"),
            Resolution::LANDSCAPE
        );
    }

    #[test]
    fn keywords_portrait_majority() {
        assert_eq!(
            classify_keywords("close up selfie of a person"),
            Resolution::PORTRAIT
        );
    }

    #[test]
    fn keywords_tie_defaults_to_portrait() {
        assert_eq!(classify_keywords("a cup of coffee"), Resolution::PORTRAIT);
        assert_eq!(classify_keywords("person on a beach"), Resolution::PORTRAIT);
    }

    #[test]
    fn keyword_policy_leaves_prompt_untouched() {
        let resolver = OrientationResolver::new(OrientationPolicy::Keywords).unwrap();
        let resolved = resolver.resolve_prompt("panorama #landscape");
        assert_eq!(resolved.prompt, "panorama #landscape");
        assert_eq!(resolved.resolution, Resolution::LANDSCAPE);
    }

    // -- policy parsing --

    #[test]
    fn policy_from_str() {
        assert_eq!(
            "marker".parse::<OrientationPolicy>().unwrap(),
            OrientationPolicy::default()
        );
        assert_eq!(
            "Keywords".parse::<OrientationPolicy>().unwrap(),
            OrientationPolicy::Keywords
        );
        assert!("both".parse::<OrientationPolicy>().is_err());
    }

    // -- media --

    #[test]
    fn media_dimensions_decide_orientation() {
        assert_eq!(resolution_for_dimensions(1920, 1080), Resolution::LANDSCAPE);
        assert_eq!(resolution_for_dimensions(1080, 1920), Resolution::PORTRAIT);
        assert_eq!(resolution_for_dimensions(1000, 1000), Resolution::PORTRAIT);
    }

    #[test]
    fn media_wins_over_prompt_but_marker_still_stripped() {
        let resolved = marker_resolver().resolve("#landscape a tall tower", Some((600, 900)));
        assert_eq!(resolved.resolution, Resolution::PORTRAIT);
        assert_eq!(resolved.prompt, "a tall tower");
    }

    // -- center crop --

    #[test]
    fn crop_wide_source_into_portrait() {
        let crop = center_crop(1920, 1080, Resolution::PORTRAIT);
        assert_eq!(crop.height, 1080);
        assert_eq!(crop.width, 607);
        assert_eq!(crop.x, (1920 - 607) / 2);
        assert_eq!(crop.y, 0);
    }

    #[test]
    fn crop_tall_source_into_landscape() {
        let crop = center_crop(1080, 1920, Resolution::LANDSCAPE);
        assert_eq!(crop.width, 1080);
        assert_eq!(crop.height, 607);
        assert_eq!(crop.x, 0);
        assert_eq!(crop.y, (1920 - 607) / 2);
    }

    #[test]
    fn crop_matching_aspect_is_identity() {
        let crop = center_crop(1280, 720, Resolution::LANDSCAPE);
        assert_eq!(
            crop,
            CropRect {
                x: 0,
                y: 0,
                width: 1280,
                height: 720
            }
        );
    }
}
