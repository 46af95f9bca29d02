//! Hierarchical authorization contexts
//!
//! A context is a named node holding its own tokens and a handle to its
//! parent. Lookups walk from the node toward the root and stop at the first
//! satisfying token. Nodes never see tokens of siblings or descendants, and
//! tokens are never merged or widened across nodes.

use crate::security::capability::token::CapabilityToken;
use crate::security::types::CapabilityType;
use std::fmt;
use std::sync::{Arc, RwLock};

struct ContextNode {
    name: String,
    depth: usize,
    parent: Option<CapabilityContext>,
    tokens: RwLock<Vec<Arc<CapabilityToken>>>,
}

/// Cheap-clone handle to a context node
#[derive(Clone)]
pub struct CapabilityContext {
    node: Arc<ContextNode>,
}

impl CapabilityContext {
    /// A context with no parent
    pub fn root(name: impl Into<String>) -> Self {
        Self::with_parent(name.into(), None)
    }

    /// A new context whose parent is `self`
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self::with_parent(name.into(), Some(self.clone()))
    }

    fn with_parent(name: String, parent: Option<CapabilityContext>) -> Self {
        let depth = parent.as_ref().map(|p| p.depth() + 1).unwrap_or(0);
        Self {
            node: Arc::new(ContextNode {
                name,
                depth,
                parent,
                tokens: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Distance from the root; roots are at depth 0
    pub fn depth(&self) -> usize {
        self.node.depth
    }

    pub fn parent(&self) -> Option<&CapabilityContext> {
        self.node.parent.as_ref()
    }

    /// Whether both handles point at the same node
    pub fn ptr_eq(&self, other: &CapabilityContext) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    pub fn grant(&self, token: Arc<CapabilityToken>) {
        self.node
            .tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(token);
    }

    /// Remove a token held by this node; ancestors are untouched
    pub fn revoke(&self, token_id: &str) -> bool {
        let mut tokens = self.node.tokens.write().unwrap_or_else(|e| e.into_inner());
        let before = tokens.len();
        tokens.retain(|t| t.id() != token_id);
        tokens.len() != before
    }

    pub fn own_tokens(&self) -> Vec<Arc<CapabilityToken>> {
        self.node
            .tokens
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Own tokens followed by every ancestor's, innermost first
    pub fn effective_tokens(&self) -> Vec<Arc<CapabilityToken>> {
        self.ancestry().flat_map(|ctx| ctx.own_tokens()).collect()
    }

    /// This context, then each ancestor up to the root
    pub fn ancestry(&self) -> impl Iterator<Item = CapabilityContext> {
        std::iter::successors(Some(self.clone()), |ctx| ctx.parent().cloned())
    }

    /// First token on the ancestor chain granting `operation` on `resource`
    pub fn satisfies(
        &self,
        capability: CapabilityType,
        resource: &str,
        operation: &str,
    ) -> Option<Arc<CapabilityToken>> {
        self.ancestry().find_map(|ctx| {
            ctx.node
                .tokens
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .find(|t| t.matches(capability, resource, operation))
                .cloned()
        })
    }

    /// Whether any token of this type is reachable, regardless of resource
    pub fn holds(&self, capability: CapabilityType) -> bool {
        self.ancestry().any(|ctx| {
            ctx.node
                .tokens
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .any(|t| t.capability() == capability && !t.is_expired())
        })
    }

    /// Context on the chain holding the token, if any
    pub fn owner_of(&self, token_id: &str) -> Option<CapabilityContext> {
        self.ancestry()
            .find(|ctx| ctx.own_tokens().iter().any(|t| t.id() == token_id))
    }
}

impl fmt::Debug for CapabilityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityContext")
            .field("name", &self.node.name)
            .field("depth", &self.node.depth)
            .field("tokens", &self.own_tokens().len())
            .field("parent", &self.parent().map(|p| p.name().to_string()))
            .finish()
    }
}
