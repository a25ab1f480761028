use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::models::TenantPolicySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny,
}

/// Fail-closed global override, evaluated before anything else in a run.
pub fn check_kill_switch(policy: &TenantPolicySnapshot) -> GateDecision {
    if policy.kill_switch_active {
        return GateDecision::Deny;
    }

    GateDecision::Allow
}

/// Tenant-wide kill switch owned by the host application.
///
/// The pipeline never reads this directly: callers take a [`snapshot`] at the
/// start of each run and pass it in, so flipping the switch mid-run only
/// affects runs that start afterwards.
///
/// [`snapshot`]: KillSwitch::snapshot
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    active: Arc<AtomicBool>,
}

impl KillSwitch {
    pub fn new(active: bool) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(active)),
        }
    }

    pub fn engage(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> TenantPolicySnapshot {
        TenantPolicySnapshot::new(self.active.load(Ordering::SeqCst))
    }
}
