//! Manager configuration.

/// Default number of rooms kept open at once.
pub const DEFAULT_MAX_ROOMS_OPEN: usize = 5;

/// Session manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Maximum number of sessions kept after eviction.
    pub max_rooms_open: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_rooms_open: DEFAULT_MAX_ROOMS_OPEN,
        }
    }
}

impl ManagerConfig {
    /// Build a config from the persisted `max rooms open` preference.
    ///
    /// A missing, unparsable or zero preference falls back to the default.
    #[must_use]
    pub fn from_preference(raw: Option<&str>) -> Self {
        let max_rooms_open = raw
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_ROOMS_OPEN);
        Self { max_rooms_open }
    }
}
