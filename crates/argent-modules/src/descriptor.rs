//! Static self-description advertised by every installed operation.

/// Capability flags of an operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpFlags(pub u32);

impl OpFlags {
    /// Not shown in the module list.
    pub const HIDDEN: OpFlags = OpFlags(1 << 0);
    /// Kept only so old edits still render; never offered for new edits.
    pub const DEPRECATED: OpFlags = OpFlags(1 << 1);
    /// At most one instance per image, instance-priority pinned to 0.
    pub const ONE_INSTANCE: OpFlags = OpFlags(1 << 2);
    /// Never recorded in the history stack.
    pub const NO_HISTORY_STACK: OpFlags = OpFlags(1 << 3);
    /// The enable toggle is not user-accessible.
    pub const HIDE_ENABLE_BUTTON: OpFlags = OpFlags(1 << 4);
    /// Enabled by default on a fresh image.
    pub const DEFAULT_ENABLED: OpFlags = OpFlags(1 << 5);
    /// Honours blend parameters.
    pub const SUPPORTS_BLENDING: OpFlags = OpFlags(1 << 6);
    /// Output can be produced tile by tile.
    pub const ALLOW_TILING: OpFlags = OpFlags(1 << 7);

    pub const fn union(self, other: OpFlags) -> OpFlags {
        OpFlags(self.0 | other.0)
    }

    pub const fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Entries of such operations may never leave the active history
    /// during the pre-append sweep.
    pub fn is_always_on(self) -> bool {
        self.contains(OpFlags::DEFAULT_ENABLED) && !self.contains(OpFlags::HIDE_ENABLE_BUTTON)
    }

    /// Entries of such operations are force-enabled wherever they appear.
    pub fn is_mandatory(self) -> bool {
        self.contains(OpFlags::DEFAULT_ENABLED) && self.contains(OpFlags::HIDE_ENABLE_BUTTON)
    }
}

impl std::ops::BitOr for OpFlags {
    type Output = OpFlags;
    fn bitor(self, rhs: OpFlags) -> OpFlags {
        self.union(rhs)
    }
}

/// Static descriptor of one installed operation type.
#[derive(Debug, Clone)]
pub struct OpDescriptor {
    /// Stable textual identifier, unique across the registry.
    pub op: &'static str,
    /// Schema version of the parameter record.
    pub version: i32,
    /// Size in bytes of the parameter record.
    pub params_size: usize,
    /// Default parameter bytes for a fresh instance.
    pub default_params: Vec<u8>,
    /// Default blend parameter bytes.
    pub default_blend_params: Vec<u8>,
    pub flags: OpFlags,
}

impl OpDescriptor {
    pub fn flags(&self) -> OpFlags {
        self.flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_composition() {
        let f = OpFlags::DEFAULT_ENABLED | OpFlags::HIDE_ENABLE_BUTTON;
        assert!(f.contains(OpFlags::DEFAULT_ENABLED));
        assert!(f.is_mandatory());
        assert!(!f.is_always_on());
    }

    #[test]
    fn test_always_on_excludes_hidden_toggle() {
        assert!(OpFlags::DEFAULT_ENABLED.is_always_on());
        assert!(!(OpFlags::DEFAULT_ENABLED | OpFlags::HIDE_ENABLE_BUTTON).is_always_on());
    }
}
