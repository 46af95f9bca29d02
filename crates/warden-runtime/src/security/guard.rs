//! Guarded operations
//!
//! An [`OperationGuard`] is the authorization step emitted in front of a
//! capability-annotated call. With `auto_use` the guard resolves a token for
//! the exact resource and runs it through the validator, consuming one use.
//! Without it the guard only checks that each capability type is reachable at
//! all and leaves the resource-level decision to the operation itself.

use crate::security::capability::{CapabilityError, CapabilityManager};
use crate::security::capability::manager::get_current_context;
use crate::security::types::CapabilityType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationGuard {
    pub name: String,
    pub capabilities: Vec<CapabilityType>,
    #[serde(default = "default_auto_use")]
    pub auto_use: bool,
}

fn default_auto_use() -> bool {
    true
}

impl OperationGuard {
    pub fn new(name: impl Into<String>, capabilities: impl IntoIterator<Item = CapabilityType>) -> Self {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().collect(),
            auto_use: true,
        }
    }

    /// Defer resource validation to the wrapped operation
    pub fn deferred(mut self) -> Self {
        self.auto_use = false;
        self
    }

    /// Authorize, then run `f`
    pub fn call<T>(
        &self,
        manager: &CapabilityManager,
        resource: &str,
        operation: &str,
        f: impl FnOnce() -> T,
    ) -> Result<T, CapabilityError> {
        self.check(manager, resource, operation)?;
        Ok(f())
    }

    pub fn check(
        &self,
        manager: &CapabilityManager,
        resource: &str,
        operation: &str,
    ) -> Result<(), CapabilityError> {
        if self.auto_use {
            for &capability in &self.capabilities {
                let result = manager.authorize(capability, resource, operation)?;
                if !result.is_allowed() {
                    log::info!("{} refused: {}", self.name, result);
                    return Err(CapabilityError::Denied(Box::new(result)));
                }
            }
            return Ok(());
        }

        let ctx = get_current_context().ok_or(CapabilityError::NoActiveContext)?;
        for &capability in &self.capabilities {
            if !ctx.holds(capability) {
                return Err(CapabilityError::NotFound {
                    capability,
                    resource: resource.to_string(),
                    operation: operation.to_string(),
                });
            }
        }
        Ok(())
    }
}
