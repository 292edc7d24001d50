use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Output frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Vertical 9:16 output.
    pub const PORTRAIT: Resolution = Resolution {
        width: 720,
        height: 1280,
    };

    /// Horizontal 16:9 output.
    pub const LANDSCAPE: Resolution = Resolution {
        width: 1280,
        height: 720,
    };

    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_width_by_height() {
        assert_eq!(Resolution::PORTRAIT.to_string(), "720x1280");
        assert_eq!(Resolution::LANDSCAPE.to_string(), "1280x720");
    }

    #[test]
    fn landscape_flag() {
        assert!(Resolution::LANDSCAPE.is_landscape());
        assert!(!Resolution::PORTRAIT.is_landscape());
    }
}
