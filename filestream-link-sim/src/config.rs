// ---------------------------------------------------------------------------
// LinkSimConfig
// ---------------------------------------------------------------------------

/// Configuration for the in-process link simulator.
///
/// All fields default to a perfect link: every open succeeds.
#[derive(Debug, Clone, Default)]
pub struct LinkSimConfig {
    // ---
    /// Fail every `open_control` with a transport error.
    pub refuse_control: bool,

    /// Fail every `open_transfer` with a transport error.
    pub refuse_transfer: bool,

    /// Control channels open, but every `send` on them fails.
    pub break_control_sends: bool,
}

// ---

impl LinkSimConfig {
    // ---
    /// Perfect link — no impairments. Useful as a baseline.
    pub fn perfect() -> Self {
        Self::default()
    }

    // ---

    /// Control channel works; every transfer channel open fails.
    pub fn refusing_transfers() -> Self {
        // ---
        Self {
            refuse_transfer: true,
            ..Default::default()
        }
    }

    // ---

    /// Control channels open but cannot carry a manifest.
    pub fn breaking_control_sends() -> Self {
        // ---
        Self {
            break_control_sends: true,
            ..Default::default()
        }
    }

    // ---

    /// The peer is unreachable for control traffic.
    pub fn refusing_control() -> Self {
        // ---
        Self {
            refuse_control: true,
            ..Default::default()
        }
    }
}
