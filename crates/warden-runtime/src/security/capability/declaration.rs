//! `capability` declarations in source
//!
//! A declaration lists grants of the form `allow <ops> "<pattern>"`. Each
//! operation name maps to one capability type; a grant whose operations span
//! several types yields one token per type, all sharing the grant's pattern.

use crate::ast::CapabilityDecl;
use crate::security::capability::token::CapabilityToken;
use crate::security::capability::CapabilityError;
use crate::security::types::CapabilityType;
use std::collections::BTreeMap;

/// Capability type an operation name in an `allow` grant refers to
pub fn capability_for_operation(operation: &str) -> Option<CapabilityType> {
    match operation {
        "read" => Some(CapabilityType::FileRead),
        "write" | "append" => Some(CapabilityType::FileWrite),
        "delete" => Some(CapabilityType::FileDelete),
        "connect" | "send" => Some(CapabilityType::NetworkConnect),
        "listen" => Some(CapabilityType::NetworkListen),
        "spawn" | "exec" => Some(CapabilityType::ProcessSpawn),
        "env" => Some(CapabilityType::EnvRead),
        _ => None,
    }
}

/// Tokens granting exactly what the declaration lists
pub fn declaration_tokens(decl: &CapabilityDecl) -> Result<Vec<CapabilityToken>, CapabilityError> {
    let mut tokens = Vec::new();
    for grant in &decl.grants {
        let mut by_type: BTreeMap<CapabilityType, Vec<&str>> = BTreeMap::new();
        for op in &grant.operations {
            let capability =
                capability_for_operation(op).ok_or_else(|| CapabilityError::UnknownOperation {
                    operation: op.clone(),
                })?;
            by_type.entry(capability).or_default().push(op.as_str());
        }
        for (capability, ops) in by_type {
            tokens.push(CapabilityToken::new(capability, &grant.pattern, ops)?);
        }
    }
    log::debug!(
        "capability {} declares {} token(s)",
        decl.name.name,
        tokens.len()
    );
    Ok(tokens)
}
