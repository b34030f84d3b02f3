//! Checks that recovered keys satisfy every declared authorization.
//!
//! A level `actor@permission` is satisfied when the named permission's
//! authority, or that of any ancestor up to `owner`, is met by the provided
//! keys. Keys that contribute to no satisfied authority are rejected.

use std::collections::BTreeSet;

use thiserror::Error;

use super::types::{PermissionLevel, Transaction};
use crate::chain::Name;
use crate::crypto::keys::PublicKey;
use crate::storage::{ChainStore, KeyEncoder, Permission, StoreError};

#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("transaction declares no authorization")]
    NoAuthorization,

    #[error("context-free action {account}::{name} must not declare authorization")]
    ContextFreeAuthorization { account: Name, name: Name },

    #[error("unknown permission {}@{}", .0.actor, .0.permission)]
    UnknownPermission(PermissionLevel),

    #[error("authorization {}@{} not satisfied by provided keys", .0.actor, .0.permission)]
    Unsatisfied(PermissionLevel),

    #[error("irrelevant signature from {0}")]
    IrrelevantSignature(PublicKey),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reserve permission id 0 as the null parent of every `owner` permission.
/// Idempotent.
pub fn initialize_permissions(store: &ChainStore) -> Result<(), StoreError> {
    if store.get::<Permission>(0)?.is_none() {
        store.insert(&Permission::default())?;
    }
    Ok(())
}

/// Verify `keys` authorize every action of `trx`.
pub fn check_authorization(
    store: &ChainStore,
    trx: &Transaction,
    keys: &BTreeSet<PublicKey>,
) -> Result<(), AuthorizationError> {
    for action in &trx.context_free_actions {
        if !action.authorization.is_empty() {
            return Err(AuthorizationError::ContextFreeAuthorization {
                account: action.account,
                name: action.name,
            });
        }
    }

    let levels: BTreeSet<PermissionLevel> = trx
        .actions
        .iter()
        .flat_map(|a| a.authorization.iter().copied())
        .collect();
    if levels.is_empty() {
        return Err(AuthorizationError::NoAuthorization);
    }

    let mut used = BTreeSet::new();
    for level in levels {
        satisfy(store, level, keys, &mut used)?;
    }

    match keys.iter().find(|key| !used.contains(*key)) {
        Some(key) => Err(AuthorizationError::IrrelevantSignature(*key)),
        None => Ok(()),
    }
}

fn satisfy(
    store: &ChainStore,
    level: PermissionLevel,
    keys: &BTreeSet<PublicKey>,
    used: &mut BTreeSet<PublicKey>,
) -> Result<(), AuthorizationError> {
    if level.actor.is_empty() {
        return Err(AuthorizationError::UnknownPermission(level));
    }
    let mut key = KeyEncoder::new();
    key.name(level.actor).name(level.permission);
    let mut current: Option<Permission> = store.find_by("by_owner", &key)?;
    if current.is_none() {
        return Err(AuthorizationError::UnknownPermission(level));
    }

    while let Some(permission) = current {
        if permission.auth.satisfied_by(|k| keys.contains(k)) {
            used.extend(
                permission
                    .auth
                    .keys
                    .iter()
                    .map(|kw| kw.key)
                    .filter(|k| keys.contains(k)),
            );
            return Ok(());
        }
        current = match permission.parent {
            0 => None,
            parent => store.get(parent)?,
        };
    }
    Err(AuthorizationError::Unsatisfied(level))
}
