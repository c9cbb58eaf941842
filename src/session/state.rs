use serde::Serialize;

/// Lifecycle phase of the underlying session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Starting,
    Connected,
    Disconnected,
    Restarting,
    /// Retry ceiling exceeded. Only a manual restart leaves this phase.
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Restarting => "restarting",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the lifecycle. Published as a whole, so readers never
/// see a half-applied transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub phase: Phase,
    pub retry_count: u32,
    pub last_qr: Option<String>,
    pub health_check_active: bool,
}

impl SessionState {
    pub fn connected(&self) -> bool {
        self.phase == Phase::Connected
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            retry_count: 0,
            last_qr: None,
            health_check_active: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
}
