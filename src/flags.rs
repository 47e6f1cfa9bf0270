//! Feature flag seam.

use dashmap::DashMap;

pub trait FeatureFlags: Send + Sync {
    /// Unknown flags read as `false`.
    fn get_flag(&self, name: &str) -> bool;
}

/// Flags held in memory, settable at runtime.
#[derive(Debug, Default)]
pub struct StaticFlags {
    flags: DashMap<String, bool>,
}

impl StaticFlags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style single flag.
    #[must_use]
    pub fn with(self, name: impl Into<String>, enabled: bool) -> Self {
        self.flags.insert(name.into(), enabled);
        self
    }

    pub fn set(&self, name: impl Into<String>, enabled: bool) {
        self.flags.insert(name.into(), enabled);
    }
}

impl FeatureFlags for StaticFlags {
    fn get_flag(&self, name: &str) -> bool {
        self.flags.get(name).map_or(false, |v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_is_false() {
        assert!(!StaticFlags::new().get_flag("realtime_sync_enabled"));
    }

    #[test]
    fn test_set_and_override() {
        let flags = StaticFlags::new().with("realtime_sync_enabled", true);
        assert!(flags.get_flag("realtime_sync_enabled"));
        flags.set("realtime_sync_enabled", false);
        assert!(!flags.get_flag("realtime_sync_enabled"));
    }
}
