//! Filesystem-backed control-plane store.
//!
//! # Layout
//! ```text
//! <root>/state/journal.json
//! <root>/state/admins/<id>.json
//! <root>/state/tenants/<slug>/tenant.json
//! <root>/state/tenants/<slug>/keys.json
//! <root>/state/tenants/<slug>/{clients,scopes,claims}/<key>.json
//! ```
//!
//! # Durability
//! Every file is written with temp-file, fsync, rename and a parent fsync,
//! then read back and compared. The journal records the last applied log
//! index; an index at or below it is skipped on replay. Snapshot restores
//! build the full tree in `state.incoming` and swap it in with renames.
//!
//! # Degradation
//! A failed write or read-back marks the store `fs_degraded`. Memory keeps
//! the applied state so all nodes stay deterministic; the next successful
//! apply rewrites the whole tree and clears the flag.
use super::{
    ApplyEvent, RotateKeysPayload, StoreError, StoreResult, Versioned, check_if_match,
};
use crate::model::{AdminRecord, ClaimDefinition, Client, Scope, Tenant};
use hellojohn_authz::{AuthzError, TenantKeySet};
use hellojohn_consensus::durable::{remove_durable, sync_dir, write_atomic};
use hellojohn_consensus::{
    Command, CommandKind, CommandResponse, ConsensusError, ConsensusResult, StateMachineBackend,
};
use hellojohn_crypto::sha256;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};

const STATE_DIR: &str = "state";
const INCOMING_DIR: &str = "state.incoming";
const PREVIOUS_DIR: &str = "state.previous";
const JOURNAL_FILE: &str = "journal.json";
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Journal {
    applied_index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_kind: Option<CommandKind>,
    #[serde(default)]
    applied_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TenantState {
    tenant: Versioned<Tenant>,
    keys: Versioned<TenantKeySet>,
    #[serde(default)]
    clients: BTreeMap<String, Versioned<Client>>,
    #[serde(default)]
    scopes: BTreeMap<String, Versioned<Scope>>,
    #[serde(default)]
    claims: BTreeMap<String, Versioned<ClaimDefinition>>,
}

/// Snapshot payload. `BTreeMap`s keep the serialized form identical on
/// every node for the same applied index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    applied_index: u64,
    #[serde(default)]
    admins: BTreeMap<String, Versioned<AdminRecord>>,
    #[serde(default)]
    tenants: BTreeMap<String, TenantState>,
}

enum FsOp {
    Put(PathBuf, Vec<u8>),
    Remove(PathBuf),
    RemoveDir(PathBuf),
}

struct Mutation {
    etag: Option<String>,
    value: Value,
    ops: Vec<FsOp>,
}

struct Inner {
    root: PathBuf,
    state: RwLock<StoreState>,
    resync: AtomicBool,
    degraded: watch::Sender<bool>,
    events: broadcast::Sender<ApplyEvent>,
}

#[derive(Clone)]
pub struct FsStore {
    inner: Arc<Inner>,
}

impl FsStore {
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(io_error)?;
        recover_interrupted_swap(&root).map_err(io_error)?;
        let state = load_tree(&root.join(STATE_DIR))?;
        tracing::info!(
            root = %root.display(),
            applied_index = state.applied_index,
            tenants = state.tenants.len(),
            "control-plane store opened"
        );
        let (degraded, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        metrics::gauge!("fs_degraded").set(0.0);
        Ok(Self {
            inner: Arc::new(Inner {
                root,
                state: RwLock::new(state),
                resync: AtomicBool::new(false),
                degraded,
                events,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn applied_index(&self) -> u64 {
        self.inner.state.read().applied_index
    }

    pub fn is_degraded(&self) -> bool {
        *self.inner.degraded.borrow()
    }

    pub fn watch_degraded(&self) -> watch::Receiver<bool> {
        self.inner.degraded.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApplyEvent> {
        self.inner.events.subscribe()
    }

    pub fn tenants(&self) -> Vec<Tenant> {
        self.inner
            .state
            .read()
            .tenants
            .values()
            .map(|tenant| tenant.tenant.value.clone())
            .collect()
    }

    pub fn tenant(&self, slug: &str) -> StoreResult<Versioned<Tenant>> {
        self.inner
            .state
            .read()
            .tenants
            .get(slug)
            .map(|tenant| tenant.tenant.clone())
            .ok_or_else(|| StoreError::NotFound(format!("tenant {slug}")))
    }

    /// Look a tenant up by slug or id.
    pub fn find_tenant(&self, slug_or_id: &str) -> Option<Tenant> {
        let state = self.inner.state.read();
        if let Some(tenant) = state.tenants.get(slug_or_id) {
            return Some(tenant.tenant.value.clone());
        }
        state
            .tenants
            .values()
            .find(|tenant| tenant.tenant.value.matches(slug_or_id))
            .map(|tenant| tenant.tenant.value.clone())
    }

    pub fn clients(&self, slug: &str) -> StoreResult<Vec<Client>> {
        self.read_tenant(slug, |tenant| {
            tenant.clients.values().map(|c| c.value.clone()).collect()
        })
    }

    pub fn client(&self, slug: &str, client_id: &str) -> StoreResult<Versioned<Client>> {
        self.read_tenant(slug, |tenant| tenant.clients.get(client_id).cloned())?
            .ok_or_else(|| StoreError::NotFound(format!("client {client_id}")))
    }

    pub fn scopes(&self, slug: &str) -> StoreResult<Vec<Scope>> {
        self.read_tenant(slug, |tenant| {
            tenant.scopes.values().map(|s| s.value.clone()).collect()
        })
    }

    pub fn scope(&self, slug: &str, name: &str) -> StoreResult<Versioned<Scope>> {
        self.read_tenant(slug, |tenant| tenant.scopes.get(name).cloned())?
            .ok_or_else(|| StoreError::NotFound(format!("scope {name}")))
    }

    pub fn claims(&self, slug: &str) -> StoreResult<Vec<ClaimDefinition>> {
        self.read_tenant(slug, |tenant| {
            tenant.claims.values().map(|c| c.value.clone()).collect()
        })
    }

    pub fn claim(&self, slug: &str, name: &str) -> StoreResult<Versioned<ClaimDefinition>> {
        self.read_tenant(slug, |tenant| tenant.claims.get(name).cloned())?
            .ok_or_else(|| StoreError::NotFound(format!("claim {name}")))
    }

    pub fn keys(&self, slug: &str) -> StoreResult<Versioned<TenantKeySet>> {
        self.read_tenant(slug, |tenant| tenant.keys.clone())
    }

    pub fn admins(&self) -> Vec<AdminRecord> {
        self.inner
            .state
            .read()
            .admins
            .values()
            .map(|admin| admin.value.clone())
            .collect()
    }

    pub fn admin(&self, id: &str) -> StoreResult<Versioned<AdminRecord>> {
        self.inner
            .state
            .read()
            .admins
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("admin {id}")))
    }

    pub fn admin_by_email(&self, email: &str) -> Option<AdminRecord> {
        self.inner
            .state
            .read()
            .admins
            .values()
            .find(|admin| admin.value.email.eq_ignore_ascii_case(email))
            .map(|admin| admin.value.clone())
    }

    fn read_tenant<T>(&self, slug: &str, read: impl FnOnce(&TenantState) -> T) -> StoreResult<T> {
        let state = self.inner.state.read();
        let tenant = state
            .tenants
            .get(slug)
            .ok_or_else(|| StoreError::NotFound(format!("tenant {slug}")))?;
        Ok(read(tenant))
    }

    fn apply_command(&self, index: u64, command: &Command) -> CommandResponse {
        let mut state = self.inner.state.write();
        if index <= state.applied_index {
            return CommandResponse::noop();
        }
        let outcome = mutate(&mut state, command);
        state.applied_index = index;
        let journal = Journal {
            applied_index: index,
            last_kind: Some(command.kind),
            applied_at: command.ts,
        };
        let (response, ops) = match outcome {
            Ok(mutation) => (
                CommandResponse::applied(mutation.etag, mutation.value),
                mutation.ops,
            ),
            Err(err) => {
                tracing::debug!(index, kind = command.kind.as_str(), error = %err, "command rejected");
                (
                    CommandResponse::rejected(err.reject_reason(), err.to_string()),
                    Vec::new(),
                )
            }
        };
        self.persist(&state, ops, &journal);
        drop(state);

        if response.is_applied() {
            let _ = self.inner.events.send(ApplyEvent {
                index,
                kind: Some(command.kind),
                tenant: command.tenant.clone(),
            });
        }
        response
    }

    fn persist(&self, state: &StoreState, ops: Vec<FsOp>, journal: &Journal) {
        let state_dir = self.inner.root.join(STATE_DIR);
        let result = if self.inner.resync.load(Ordering::Acquire) {
            self.write_full(state)
        } else {
            ops.iter()
                .try_for_each(|op| run_op(&state_dir, op))
                .and_then(|_| write_record(&state_dir.join(JOURNAL_FILE), journal))
        };
        match result {
            Ok(()) => {
                if self.inner.resync.swap(false, Ordering::AcqRel) {
                    tracing::info!(index = journal.applied_index, "control-plane store resynchronized");
                }
                self.set_degraded(false);
            }
            Err(err) => {
                tracing::error!(index = journal.applied_index, error = %err, "control-plane write failed");
                self.inner.resync.store(true, Ordering::Release);
                self.set_degraded(true);
            }
        }
    }

    fn set_degraded(&self, degraded: bool) {
        let changed = self.inner.degraded.send_if_modified(|current| {
            if *current == degraded {
                false
            } else {
                *current = degraded;
                true
            }
        });
        if changed {
            metrics::gauge!("fs_degraded").set(if degraded { 1.0 } else { 0.0 });
            tracing::warn!(degraded, "fs_degraded changed");
        }
    }

    /// Write the complete tree beside the live one and swap it in.
    fn write_full(&self, state: &StoreState) -> io::Result<()> {
        let root = &self.inner.root;
        let incoming = root.join(INCOMING_DIR);
        if incoming.exists() {
            fs::remove_dir_all(&incoming)?;
        }
        write_tree(&incoming, state)?;
        let live = root.join(STATE_DIR);
        let previous = root.join(PREVIOUS_DIR);
        if previous.exists() {
            fs::remove_dir_all(&previous)?;
        }
        if live.exists() {
            fs::rename(&live, &previous)?;
        }
        fs::rename(&incoming, &live)?;
        sync_dir(root)?;
        if previous.exists() {
            fs::remove_dir_all(&previous)?;
        }
        Ok(())
    }
}

impl StateMachineBackend for FsStore {
    fn apply(&self, index: u64, command: &Command) -> CommandResponse {
        self.apply_command(index, command)
    }

    fn last_applied_index(&self) -> u64 {
        self.applied_index()
    }

    fn snapshot(&self) -> ConsensusResult<Vec<u8>> {
        serde_json::to_vec(&*self.inner.state.read())
            .map_err(|err| ConsensusError::Storage(err.to_string()))
    }

    fn restore(&self, index: u64, data: &[u8]) -> ConsensusResult<()> {
        let mut restored: StoreState =
            serde_json::from_slice(data).map_err(|err| ConsensusError::Storage(err.to_string()))?;
        restored.applied_index = index;
        let mut state = self.inner.state.write();
        self.write_full(&restored)?;
        *state = restored;
        self.inner.resync.store(false, Ordering::Release);
        self.set_degraded(false);
        drop(state);
        tracing::info!(index, "control-plane state restored from snapshot");
        let _ = self.inner.events.send(ApplyEvent {
            index,
            kind: None,
            tenant: None,
        });
        Ok(())
    }
}

fn mutate(state: &mut StoreState, command: &Command) -> StoreResult<Mutation> {
    let if_match = command.if_match.as_deref();
    let key = command.key.as_str();
    match command.kind {
        CommandKind::UpsertTenant => {
            let mut tenant: Tenant = decode(&command.payload)?;
            if tenant.slug != key {
                return Err(StoreError::Invalid("tenant slug does not match key".to_string()));
            }
            tenant.validate().map_err(StoreError::Invalid)?;
            let existing = state.tenants.get(key);
            check_if_match(existing.map(|t| t.tenant.etag.as_str()), if_match)?;
            match existing {
                Some(existing) => {
                    tenant.id = existing.tenant.value.id;
                    tenant.created_at = existing.tenant.value.created_at;
                }
                None => {
                    if state.tenants.values().any(|t| t.tenant.value.id == tenant.id) {
                        return Err(StoreError::Conflict(format!("tenant id {} in use", tenant.id)));
                    }
                    tenant.created_at = command.ts;
                }
            }
            tenant.updated_at = command.ts;
            let versioned = Versioned::new(tenant)?;
            let path = tenant_dir(key).join("tenant.json");
            let mutation = Mutation {
                etag: Some(versioned.etag.clone()),
                value: to_value(&versioned.value)?,
                ops: vec![FsOp::Put(path, encode(&versioned.value)?)],
            };
            match state.tenants.get_mut(key) {
                Some(existing) => existing.tenant = versioned,
                None => {
                    let keys = Versioned::new(TenantKeySet::default())?;
                    state.tenants.insert(
                        key.to_string(),
                        TenantState {
                            tenant: versioned,
                            keys,
                            clients: BTreeMap::new(),
                            scopes: BTreeMap::new(),
                            claims: BTreeMap::new(),
                        },
                    );
                }
            }
            Ok(mutation)
        }
        CommandKind::DeleteTenant => {
            let existing = state
                .tenants
                .get(key)
                .ok_or_else(|| StoreError::NotFound(format!("tenant {key}")))?;
            check_if_match(Some(existing.tenant.etag.as_str()), if_match)?;
            state.tenants.remove(key);
            Ok(Mutation {
                etag: None,
                value: json!({ "slug": key }),
                ops: vec![FsOp::RemoveDir(tenant_dir(key))],
            })
        }
        CommandKind::UpsertClient => {
            let slug = command_tenant(command)?;
            let client: Client = decode(&command.payload)?;
            if client.client_id != key {
                return Err(StoreError::Invalid("client_id does not match key".to_string()));
            }
            client.validate().map_err(StoreError::Invalid)?;
            let tenant = tenant_mut(state, slug)?;
            let path = tenant_dir(slug).join("clients").join(format!("{key}.json"));
            upsert_entry(&mut tenant.clients, key, client, if_match, path, Client::redacted)
        }
        CommandKind::DeleteClient => {
            let slug = command_tenant(command)?;
            let tenant = tenant_mut(state, slug)?;
            let path = tenant_dir(slug).join("clients").join(format!("{key}.json"));
            delete_entry(&mut tenant.clients, "client", key, if_match, path)
        }
        CommandKind::UpsertScope => {
            let slug = command_tenant(command)?;
            let scope: Scope = decode(&command.payload)?;
            if scope.name != key {
                return Err(StoreError::Invalid("scope name does not match key".to_string()));
            }
            scope.validate().map_err(StoreError::Invalid)?;
            let tenant = tenant_mut(state, slug)?;
            let path = tenant_dir(slug).join("scopes").join(format!("{key}.json"));
            upsert_entry(&mut tenant.scopes, key, scope, if_match, path, Scope::clone)
        }
        CommandKind::DeleteScope => {
            let slug = command_tenant(command)?;
            let tenant = tenant_mut(state, slug)?;
            let path = tenant_dir(slug).join("scopes").join(format!("{key}.json"));
            delete_entry(&mut tenant.scopes, "scope", key, if_match, path)
        }
        CommandKind::UpsertClaim => {
            let slug = command_tenant(command)?;
            let claim: ClaimDefinition = decode(&command.payload)?;
            if claim.name != key {
                return Err(StoreError::Invalid("claim name does not match key".to_string()));
            }
            claim.validate().map_err(StoreError::Invalid)?;
            let tenant = tenant_mut(state, slug)?;
            let path = tenant_dir(slug).join("claims").join(format!("{key}.json"));
            upsert_entry(&mut tenant.claims, key, claim, if_match, path, ClaimDefinition::clone)
        }
        CommandKind::DeleteClaim => {
            let slug = command_tenant(command)?;
            let tenant = tenant_mut(state, slug)?;
            let path = tenant_dir(slug).join("claims").join(format!("{key}.json"));
            delete_entry(&mut tenant.claims, "claim", key, if_match, path)
        }
        CommandKind::RotateKeys => {
            let slug = command_tenant(command)?;
            let payload: RotateKeysPayload = decode(&command.payload)?;
            let tenant = tenant_mut(state, slug)?;
            let mut keys = tenant.keys.value.clone();
            if keys.keys.iter().any(|existing| existing.kid == payload.key.kid) {
                // Replayed command: the key is already installed.
                return Ok(Mutation {
                    etag: Some(tenant.keys.etag.clone()),
                    value: json!({ "kid": payload.key.kid }),
                    ops: Vec::new(),
                });
            }
            let kid = if payload.initial {
                let new_kid = payload.key.kid.clone();
                if keys.generate_initial(payload.key).map_err(key_error)? {
                    new_kid
                } else {
                    keys.active().map(|active| active.kid.clone()).unwrap_or_default()
                }
            } else {
                keys.rotate(payload.key, payload.grace_seconds, command.ts)
                    .map_err(key_error)?
            };
            keys.validate().map_err(key_error)?;
            let versioned = Versioned::new(keys)?;
            let path = tenant_dir(slug).join("keys.json");
            let ops = vec![FsOp::Put(path, encode(&versioned.value)?)];
            let etag = versioned.etag.clone();
            tenant.keys = versioned;
            Ok(Mutation {
                etag: Some(etag),
                value: json!({ "kid": kid }),
                ops,
            })
        }
        CommandKind::RevokeKey => {
            let slug = command_tenant(command)?;
            let tenant = tenant_mut(state, slug)?;
            let mut keys = tenant.keys.value.clone();
            keys.revoke(key, command.ts).map_err(key_error)?;
            let versioned = Versioned::new(keys)?;
            let path = tenant_dir(slug).join("keys.json");
            let ops = vec![FsOp::Put(path, encode(&versioned.value)?)];
            let etag = versioned.etag.clone();
            tenant.keys = versioned;
            Ok(Mutation {
                etag: Some(etag),
                value: json!({ "kid": key, "status": "revoked" }),
                ops,
            })
        }
        CommandKind::UpsertAdmin => {
            let admin: AdminRecord = decode(&command.payload)?;
            if admin.id.to_string() != key {
                return Err(StoreError::Invalid("admin id does not match key".to_string()));
            }
            if state.admins.values().any(|other| {
                other.value.id != admin.id && other.value.email.eq_ignore_ascii_case(&admin.email)
            }) {
                return Err(StoreError::Conflict(format!("admin {} already exists", admin.email)));
            }
            let path = PathBuf::from("admins").join(format!("{key}.json"));
            upsert_entry(&mut state.admins, key, admin, if_match, path, AdminRecord::without_secret)
        }
        CommandKind::DeleteAdmin => {
            let path = PathBuf::from("admins").join(format!("{key}.json"));
            delete_entry(&mut state.admins, "admin", key, if_match, path)
        }
    }
}

fn upsert_entry<T: Serialize>(
    map: &mut BTreeMap<String, Versioned<T>>,
    key: &str,
    value: T,
    if_match: Option<&str>,
    path: PathBuf,
    public: impl Fn(&T) -> T,
) -> StoreResult<Mutation> {
    check_if_match(map.get(key).map(|entry| entry.etag.as_str()), if_match)?;
    let versioned = Versioned::new(value)?;
    let mutation = Mutation {
        etag: Some(versioned.etag.clone()),
        value: to_value(&public(&versioned.value))?,
        ops: vec![FsOp::Put(path, encode(&versioned.value)?)],
    };
    map.insert(key.to_string(), versioned);
    Ok(mutation)
}

fn delete_entry<T>(
    map: &mut BTreeMap<String, Versioned<T>>,
    kind: &str,
    key: &str,
    if_match: Option<&str>,
    path: PathBuf,
) -> StoreResult<Mutation> {
    let existing = map
        .get(key)
        .ok_or_else(|| StoreError::NotFound(format!("{kind} {key}")))?;
    check_if_match(Some(existing.etag.as_str()), if_match)?;
    map.remove(key);
    Ok(Mutation {
        etag: None,
        value: Value::Null,
        ops: vec![FsOp::Remove(path)],
    })
}

fn command_tenant(command: &Command) -> StoreResult<&str> {
    command
        .tenant
        .as_deref()
        .ok_or_else(|| StoreError::Invalid(format!("{} requires a tenant", command.kind.as_str())))
}

fn tenant_mut<'a>(state: &'a mut StoreState, slug: &str) -> StoreResult<&'a mut TenantState> {
    state
        .tenants
        .get_mut(slug)
        .ok_or_else(|| StoreError::NotFound(format!("tenant {slug}")))
}

fn key_error(err: AuthzError) -> StoreError {
    match err {
        AuthzError::KeyNotFound { kid, .. } => StoreError::NotFound(format!("key {kid}")),
        AuthzError::ActiveKeyRevocation(kid) => {
            StoreError::Conflict(format!("key {kid} is active; rotate before revoking"))
        }
        other => StoreError::Invalid(other.to_string()),
    }
}

fn tenant_dir(slug: &str) -> PathBuf {
    PathBuf::from("tenants").join(slug)
}

fn decode<T: DeserializeOwned>(payload: &Value) -> StoreResult<T> {
    serde_json::from_value(payload.clone()).map_err(|err| StoreError::Invalid(err.to_string()))
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|err| StoreError::Unexpected(err.into()))
}

fn to_value<T: Serialize>(value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(|err| StoreError::Unexpected(err.into()))
}

fn io_error(err: io::Error) -> StoreError {
    StoreError::Unexpected(err.into())
}

fn run_op(state_dir: &Path, op: &FsOp) -> io::Result<()> {
    match op {
        FsOp::Put(path, bytes) => write_verified(&state_dir.join(path), bytes),
        FsOp::Remove(path) => remove_durable(&state_dir.join(path)),
        FsOp::RemoveDir(path) => {
            let dir = state_dir.join(path);
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(err),
            }
            match dir.parent() {
                Some(parent) => sync_dir(parent),
                None => Ok(()),
            }
        }
    }
}

/// Atomic write followed by a read-back comparison.
fn write_verified(path: &Path, bytes: &[u8]) -> io::Result<()> {
    write_atomic(path, bytes)?;
    let stored = fs::read(path)?;
    if sha256(&stored) != sha256(bytes) {
        return Err(io::Error::other(format!(
            "integrity check failed for {}",
            path.display()
        )));
    }
    Ok(())
}

fn write_record<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    write_verified(path, &bytes)
}

fn write_tree(dir: &Path, state: &StoreState) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    for (id, admin) in &state.admins {
        write_record(&dir.join("admins").join(format!("{id}.json")), &admin.value)?;
    }
    for (slug, tenant) in &state.tenants {
        let tenant_dir = dir.join("tenants").join(slug);
        write_record(&tenant_dir.join("tenant.json"), &tenant.tenant.value)?;
        write_record(&tenant_dir.join("keys.json"), &tenant.keys.value)?;
        for (key, client) in &tenant.clients {
            write_record(&tenant_dir.join("clients").join(format!("{key}.json")), &client.value)?;
        }
        for (key, scope) in &tenant.scopes {
            write_record(&tenant_dir.join("scopes").join(format!("{key}.json")), &scope.value)?;
        }
        for (key, claim) in &tenant.claims {
            write_record(&tenant_dir.join("claims").join(format!("{key}.json")), &claim.value)?;
        }
    }
    write_record(
        &dir.join(JOURNAL_FILE),
        &Journal {
            applied_index: state.applied_index,
            last_kind: None,
            applied_at: 0,
        },
    )
}

/// Finish or discard a swap interrupted by a crash.
fn recover_interrupted_swap(root: &Path) -> io::Result<()> {
    let incoming = root.join(INCOMING_DIR);
    let live = root.join(STATE_DIR);
    let previous = root.join(PREVIOUS_DIR);
    if previous.exists() {
        if live.exists() {
            fs::remove_dir_all(&previous)?;
        } else if incoming.exists() {
            fs::rename(&incoming, &live)?;
            fs::remove_dir_all(&previous)?;
        } else {
            fs::rename(&previous, &live)?;
        }
    }
    if incoming.exists() {
        fs::remove_dir_all(&incoming)?;
    }
    Ok(())
}

fn load_tree(dir: &Path) -> StoreResult<StoreState> {
    let mut state = StoreState::default();
    if !dir.exists() {
        return Ok(state);
    }
    let journal: Journal = read_record(&dir.join(JOURNAL_FILE))?.unwrap_or_default();
    state.applied_index = journal.applied_index;
    state.admins = load_entries(&dir.join("admins"))?;

    let tenants_dir = dir.join("tenants");
    for slug in list_dirs(&tenants_dir).map_err(io_error)? {
        let tenant_dir = tenants_dir.join(&slug);
        let Some(tenant) = read_record::<Tenant>(&tenant_dir.join("tenant.json"))? else {
            tracing::warn!(tenant = %slug, "tenant directory without tenant.json skipped");
            continue;
        };
        let keys = read_record::<TenantKeySet>(&tenant_dir.join("keys.json"))?.unwrap_or_default();
        state.tenants.insert(
            slug,
            TenantState {
                tenant: Versioned::new(tenant)?,
                keys: Versioned::new(keys)?,
                clients: load_entries(&tenant_dir.join("clients"))?,
                scopes: load_entries(&tenant_dir.join("scopes"))?,
                claims: load_entries(&tenant_dir.join("claims"))?,
            },
        );
    }
    Ok(state)
}

fn read_record<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            StoreError::Unexpected(anyhow::anyhow!("{}: {err}", path.display()))
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(err)),
    }
}

fn load_entries<T: Serialize + DeserializeOwned>(
    dir: &Path,
) -> StoreResult<BTreeMap<String, Versioned<T>>> {
    let mut entries = BTreeMap::new();
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(entries),
        Err(err) => return Err(io_error(err)),
    };
    for entry in listing {
        let path = entry.map_err(io_error)?.path();
        let Some(key) = path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.starts_with('.'))
            .and_then(|name| name.strip_suffix(".json"))
            .map(str::to_string)
        else {
            continue;
        };
        if let Some(value) = read_record::<T>(&path)? {
            entries.insert(key, Versioned::new(value)?);
        }
    }
    Ok(entries)
}

fn list_dirs(dir: &Path) -> io::Result<Vec<String>> {
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut names = Vec::new();
    for entry in listing {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && let Some(name) = entry.file_name().to_str()
        {
            names.push(name.to_string());
        }
    }
    Ok(names)
}
