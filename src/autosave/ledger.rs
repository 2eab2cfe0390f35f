use tracing::{debug, warn};

use super::store::DocVersion;

/// Last version the store confirmed, echoed back with every save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionLedger {
    current: DocVersion,
}

impl VersionLedger {
    pub fn new(loaded: DocVersion) -> Self {
        Self { current: loaded }
    }

    /// Records a committed version. Anything not newer than what we know is ignored.
    pub fn observe(&mut self, version: DocVersion) -> bool {
        if version <= self.current {
            warn!(
                %version,
                current = %self.current,
                "Store reported a version that is not newer than the known one"
            );
            return false;
        }
        debug!(from = %self.current, to = %version, "Version advanced");
        self.current = version;
        true
    }

    pub fn current(&self) -> DocVersion {
        self.current
    }
}
