use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::network::{ListenerGuard, NetworkStatusMonitor};
use crate::orchestrator::resolve_mode;
use crate::types::{EffectiveMode, ModePreference};

/// What the UI reads to render the online/offline toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeSnapshot {
    /// Last explicit choice, kept while offline
    pub user_preference: ModePreference,
    pub online: bool,
    /// Forced to local while offline
    pub displayed_preference: ModePreference,
    pub effective_mode: EffectiveMode,
}

impl ModeSnapshot {
    fn derive(user_preference: ModePreference, online: bool) -> Self {
        Self {
            user_preference,
            online,
            displayed_preference: if online {
                user_preference
            } else {
                ModePreference::Local
            },
            effective_mode: resolve_mode(user_preference, online),
        }
    }
}

/// Single source of truth for "is online mode active" in a session
#[derive(Debug)]
pub struct ModeController {
    state: watch::Sender<ModeSnapshot>,
}

impl ModeController {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(ModeSnapshot::derive(ModePreference::Local, online));
        Self { state }
    }

    pub fn set_user_preference(&self, online: bool) {
        self.set_preference(ModePreference::from_online(online));
    }

    pub fn set_preference(&self, preference: ModePreference) {
        self.state.send_if_modified(|snapshot| {
            if snapshot.user_preference == preference {
                return false;
            }
            *snapshot = ModeSnapshot::derive(preference, snapshot.online);
            true
        });
    }

    /// Applies a connectivity transition. The user's choice is kept so that
    /// online mode comes back by itself once the network returns.
    pub fn connectivity_changed(&self, online: bool) {
        self.state.send_if_modified(|snapshot| {
            if snapshot.online == online {
                return false;
            }
            *snapshot = ModeSnapshot::derive(snapshot.user_preference, online);
            if snapshot.user_preference == ModePreference::Online {
                if online {
                    info!("Connectivity restored, online mode resumed");
                } else {
                    info!("Connectivity lost, forcing local mode");
                }
            }
            true
        });
    }

    pub fn current_effective_mode(&self) -> EffectiveMode {
        self.state.borrow().effective_mode
    }

    pub fn displayed_preference(&self) -> ModePreference {
        self.state.borrow().displayed_preference
    }

    pub fn user_preference(&self) -> ModePreference {
        self.state.borrow().user_preference
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        *self.state.borrow()
    }

    /// Change stream for UI layers
    pub fn subscribe(&self) -> watch::Receiver<ModeSnapshot> {
        self.state.subscribe()
    }

    /// Follows the monitor's transitions until the returned guard is dropped.
    /// The listener is registered before the current value is read so that a
    /// transition landing in between is not lost.
    pub fn bind(self: &Arc<Self>, monitor: &NetworkStatusMonitor) -> ListenerGuard {
        let weak = Arc::downgrade(self);
        let guard = monitor.on_change(move |online| {
            if let Some(controller) = weak.upgrade() {
                controller.connectivity_changed(online);
            }
        });
        self.connectivity_changed(monitor.is_online());
        guard
    }
}
