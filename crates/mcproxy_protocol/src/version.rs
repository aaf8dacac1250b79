use std::fmt;

/// Protocol version numbers for the Minecraft versions the proxy knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version(i32);

impl Version {
    /// Protocol version for Minecraft 1.12.2, the last "legacy" layout
    pub const V1_12_2: Version = Version(340);
    /// Protocol version for Minecraft 1.19.2
    pub const V1_19_2: Version = Version(760);
    /// Protocol version for Minecraft 1.19.3
    pub const V1_19_3: Version = Version(761);
    /// Protocol version for Minecraft 1.19.4
    pub const V1_19_4: Version = Version(762);
    /// Protocol version for Minecraft 1.20.1
    pub const V1_20_1: Version = Version(763);

    pub const fn new(protocol: i32) -> Self {
        Version(protocol)
    }

    pub const fn protocol_number(&self) -> i32 {
        self.0
    }

    /// Returns the version name (e.g., "1.12.2")
    pub fn name(&self) -> &'static str {
        match self.0 {
            340 => "1.12.2",
            760 => "1.19.2",
            761 => "1.19.3",
            762 => "1.19.4",
            763 => "1.20.1",
            _ => "Unknown Version",
        }
    }

    /// Legacy clients predate packets such as `server_data` and
    /// `update_view_position` and must never receive them.
    pub const fn is_legacy(&self) -> bool {
        self.0 <= Self::V1_12_2.0
    }

    /// `bundle_delimiter` exists from 1.19.4 on
    pub const fn has_bundle_delimiter(&self) -> bool {
        self.0 >= Self::V1_19_4.0
    }
}

impl From<i32> for Version {
    fn from(protocol: i32) -> Self {
        Version(protocol)
    }
}

impl From<Version> for i32 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}
