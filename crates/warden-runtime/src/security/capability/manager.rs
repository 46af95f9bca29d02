//! Capability manager
//!
//! The active context lives in a thread-local slot. Each thread starts with
//! no context; scopes are pushed with [`CapabilityManager::enter_scope`] and
//! popped when the returned guard drops, so push/pop is strictly LIFO within
//! one thread and a context never leaks into another thread's lookups.
//!
//! The manager answers "is there a token for this". Resource-aware judgment
//! is delegated to the [`EnhancedValidator`] through [`CapabilityManager::authorize`].

use crate::security::audit::{AuditEvent, AuditLogger, NullAuditLogger};
use crate::security::capability::context::CapabilityContext;
use crate::security::capability::token::CapabilityToken;
use crate::security::capability::CapabilityError;
use crate::security::types::CapabilityType;
use crate::security::validator::{EnhancedValidator, ValidationResult};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static ACTIVE: RefCell<Option<CapabilityContext>> = const { RefCell::new(None) };
}

/// Active context of the calling thread
pub fn get_current_context() -> Option<CapabilityContext> {
    ACTIVE.with(|slot| slot.borrow().clone())
}

/// Replace the calling thread's active context, returning the previous one
pub fn set_current_context(context: Option<CapabilityContext>) -> Option<CapabilityContext> {
    ACTIVE.with(|slot| slot.replace(context))
}

/// Restores the previous active context on drop
///
/// Not `Send`: a scope belongs to the thread that entered it.
#[must_use = "the scope is popped as soon as the guard is dropped"]
pub struct ScopeGuard {
    context: CapabilityContext,
    previous: Option<CapabilityContext>,
    audit: Arc<dyn AuditLogger>,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub fn context(&self) -> &CapabilityContext {
        &self.context
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let popped = set_current_context(self.previous.take());
        if !popped.is_some_and(|c| c.ptr_eq(&self.context)) {
            log::error!(
                "capability scope '{}' popped out of order",
                self.context.name()
            );
        }
        log::debug!(
            "leaving capability scope '{}' (depth {})",
            self.context.name(),
            self.context.depth()
        );
        self.audit.log(AuditEvent::ContextExited {
            name: self.context.name().to_string(),
            depth: self.context.depth(),
        });
    }
}

/// Issues, looks up and revokes tokens against the active context
#[derive(Clone)]
pub struct CapabilityManager {
    validator: Arc<EnhancedValidator>,
    audit: Arc<dyn AuditLogger>,
}

impl Default for CapabilityManager {
    fn default() -> Self {
        Self::new(Arc::new(EnhancedValidator::default()))
    }
}

impl std::fmt::Debug for CapabilityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityManager")
            .field("validator", &self.validator)
            .finish()
    }
}

impl CapabilityManager {
    pub fn new(validator: Arc<EnhancedValidator>) -> Self {
        Self {
            validator,
            audit: Arc::new(NullAuditLogger::new()),
        }
    }

    pub fn with_audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit = logger;
        self
    }

    pub fn validator(&self) -> &Arc<EnhancedValidator> {
        &self.validator
    }

    /// Push a child of the active context (or a new root) for this thread
    pub fn enter_scope(&self, name: impl Into<String>) -> ScopeGuard {
        let name = name.into();
        let context = match get_current_context() {
            Some(parent) => parent.child(name),
            None => CapabilityContext::root(name),
        };
        log::debug!(
            "entering capability scope '{}' (depth {})",
            context.name(),
            context.depth()
        );
        self.audit.log(AuditEvent::ContextEntered {
            name: context.name().to_string(),
            depth: context.depth(),
        });
        let previous = set_current_context(Some(context.clone()));
        ScopeGuard {
            context,
            previous,
            audit: Arc::clone(&self.audit),
            _not_send: PhantomData,
        }
    }

    /// Run `f` inside a fresh scope; the scope is popped even if `f` panics
    pub fn with_scope<T>(&self, name: impl Into<String>, f: impl FnOnce(&CapabilityContext) -> T) -> T {
        let guard = self.enter_scope(name);
        f(guard.context())
    }

    /// Install a token into `context`, or into the active context when `None`
    pub fn add_capability(
        &self,
        context: Option<&CapabilityContext>,
        token: CapabilityToken,
    ) -> Result<Arc<CapabilityToken>, CapabilityError> {
        let target = match context {
            Some(ctx) => ctx.clone(),
            None => get_current_context().ok_or(CapabilityError::NoActiveContext)?,
        };
        let token = Arc::new(token);
        target.grant(Arc::clone(&token));
        log::debug!(
            "granted {} on '{}' as {} in '{}'",
            token.capability(),
            token.pattern(),
            token.id(),
            target.name()
        );
        self.audit.log(AuditEvent::CapabilityGranted {
            token_id: token.id().to_string(),
            capability: token.capability(),
            pattern: token.pattern().to_string(),
            context: target.name().to_string(),
        });
        Ok(token)
    }

    /// Build a token and install it into the active context
    pub fn issue<I, S>(
        &self,
        capability: CapabilityType,
        pattern: &str,
        operations: I,
    ) -> Result<Arc<CapabilityToken>, CapabilityError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let token = CapabilityToken::new(capability, pattern, operations)?;
        self.add_capability(None, token)
    }

    /// Remove a token held by the active context itself
    ///
    /// Tokens inherited from an enclosing scope stay in place: a nested scope
    /// cannot change what its siblings see.
    pub fn revoke(&self, token_id: &str) -> Result<bool, CapabilityError> {
        let current = get_current_context().ok_or(CapabilityError::NoActiveContext)?;
        let Some(owner) = current.owner_of(token_id) else {
            return Ok(false);
        };
        if !owner.ptr_eq(&current) {
            log::warn!(
                "scope '{}' cannot revoke {} held by enclosing scope '{}'",
                current.name(),
                token_id,
                owner.name()
            );
            return Ok(false);
        }
        let removed = current.revoke(token_id);
        if removed {
            log::debug!("revoked {} from '{}'", token_id, current.name());
            self.audit.log(AuditEvent::CapabilityRevoked {
                token_id: token_id.to_string(),
                context: current.name().to_string(),
            });
        }
        Ok(removed)
    }

    /// Whether the active context satisfies the request; false without a context
    pub fn has_capability(&self, capability: CapabilityType, resource: &str, operation: &str) -> bool {
        get_current_context()
            .and_then(|ctx| ctx.satisfies(capability, resource, operation))
            .is_some()
    }

    /// The satisfying token, or a typed failure for the call site
    pub fn require_capability(
        &self,
        capability: CapabilityType,
        resource: &str,
        operation: &str,
    ) -> Result<Arc<CapabilityToken>, CapabilityError> {
        let ctx = get_current_context().ok_or(CapabilityError::NoActiveContext)?;
        match ctx.satisfies(capability, resource, operation) {
            Some(token) => Ok(token),
            None => {
                log::info!(
                    "no token for {} {} on {} in '{}'",
                    capability,
                    operation,
                    resource,
                    ctx.name()
                );
                self.audit.log(AuditEvent::CapabilityDenied {
                    capability,
                    resource: resource.to_string(),
                    operation: operation.to_string(),
                });
                Err(CapabilityError::NotFound {
                    capability,
                    resource: resource.to_string(),
                    operation: operation.to_string(),
                })
            }
        }
    }

    /// Token lookup followed by validation
    ///
    /// Only missing tokens and contexts are errors; a DENIED or SUSPICIOUS
    /// decision is returned as a value.
    pub fn authorize(
        &self,
        capability: CapabilityType,
        resource: &str,
        operation: &str,
    ) -> Result<ValidationResult, CapabilityError> {
        let token = self.require_capability(capability, resource, operation)?;
        Ok(self.validator.validate(capability, resource, operation, &token))
    }
}
