//! Gallery Shield - Protection Scopes
//!
//! Context stack of active protection levels. Mounted views push their level
//! and get an RAII guard back; the host applies [`ProtectionScopes::active_classes`]
//! to its own root element instead of mutating the document body.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::policy::ProtectionLevel;

#[derive(Default)]
struct ScopeStack {
    entries: Vec<(u64, ProtectionLevel)>,
    next_id: u64,
}

/// Shared stack of active protection scopes
#[derive(Clone, Default)]
pub struct ProtectionScopes {
    stack: Arc<Mutex<ScopeStack>>,
}

impl ProtectionScopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, level: ProtectionLevel) -> ScopeGuard {
        let mut stack = self.stack.lock();
        let id = stack.next_id;
        stack.next_id += 1;
        stack.entries.push((id, level));
        ScopeGuard {
            scopes: self.clone(),
            id,
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.lock().entries.len()
    }

    /// Strongest level among live scopes
    pub fn strongest(&self) -> Option<ProtectionLevel> {
        self.stack.lock().entries.iter().map(|(_, level)| *level).max()
    }

    /// Class names for the host root element
    pub fn active_classes(&self) -> Vec<String> {
        match self.strongest() {
            Some(level @ (ProtectionLevel::Enhanced | ProtectionLevel::Maximum)) => {
                vec![format!("protection-{}", level.as_str())]
            }
            _ => Vec::new(),
        }
    }

    fn pop(&self, id: u64) {
        self.stack.lock().entries.retain(|(entry, _)| *entry != id);
    }
}

/// Live scope; dropping it pops the level
pub struct ScopeGuard {
    scopes: ProtectionScopes,
    id: u64,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scopes.pop(self.id);
    }
}
