//! Process-level feature switches, read from the environment at the moment
//! the guarded action runs.

/// Disables forced removal of decommissioned nodes.
pub const AWARENESS_ATTRIBUTE_DECOMMISSION: KillSwitch =
    KillSwitch::new("ZONAL_FEATURE_SWITCH_AWARENESS_ATTRIBUTE_DECOMMISSION_DISABLED");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KillSwitch {
    name: &'static str,
}

impl KillSwitch {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the guarded feature is disabled. Only a case-insensitive
    /// `"true"` engages the switch.
    pub fn is_engaged(&self) -> bool {
        std::env::var(self.name).is_ok_and(|v| v.eq_ignore_ascii_case("true"))
    }
}
