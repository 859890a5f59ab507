//! The shared item-state manager.
//!
//! The single authoritative in-memory view of the repository. States
//! resolved here are shared among all sessions; sessions commit their
//! transient change logs through [`SharedItemStateManager::store`], which
//! validates references, reconnects transient states to their shared peers,
//! derives events from the pre-push view, pushes, stores durably, publishes
//! the transitions, and dispatches events.
//!
//! All public operations serialize on one manager-level mutex. The cache
//! and the individual states carry their own short-lived locks, so the
//! listener callbacks fired during publication never re-enter the manager
//! lock.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use arbor_core::changelog::ChangeLog;
use arbor_core::identity::{ItemId, NodeId, NodeReferencesId, PropertyId};
use arbor_core::name;
use arbor_core::nodetype::{NodeTypeRegistry, SchemaError};
use arbor_core::references::NodeReferences;
use arbor_core::state::{ItemState, ItemStateListener, Status};
use arbor_core::value::{Value, ValueType};

use crate::cache::ItemStateCache;
use crate::error::ItemStateError;
use crate::events::{ItemStateSource, ObservationManager};
use crate::overlay::VirtualItemStateProvider;
use crate::persistence::PersistenceManager;
use crate::Result;

/// The manager's subscription on shared states: creation inserts into the
/// cache, destruction and discard evict. Registered at load or create,
/// detached at eviction.
struct CacheBinding {
    cache: Arc<ItemStateCache>,
}

impl ItemStateListener for CacheBinding {
    fn state_created(&self, state: &Arc<ItemState>) {
        self.cache.cache_idempotent(Arc::clone(state));
    }

    fn state_modified(&self, _state: &Arc<ItemState>) {
        // Modification does not change cache identity.
    }

    fn state_destroyed(&self, state: &Arc<ItemState>) {
        self.cache.evict(state.id());
    }

    fn state_discarded(&self, state: &Arc<ItemState>) {
        self.cache.evict(state.id());
    }
}

type ProviderList = Arc<Vec<Arc<dyn VirtualItemStateProvider>>>;

pub struct SharedItemStateManager {
    persistence: Arc<dyn PersistenceManager>,
    cache: Arc<ItemStateCache>,
    listener: Arc<dyn ItemStateListener>,
    providers: Mutex<ProviderList>,
    root_id: NodeId,
    root: OnceLock<Arc<ItemState>>,
    serial: Mutex<()>,
    poisoned: AtomicBool,
}

impl SharedItemStateManager {
    /// Boots against `persistence`: resolves the root node, or creates and
    /// durably stores it (`rep:root` plus its `jcr:primaryType` property)
    /// when the store is empty. Missing root definitions in the registry
    /// abort the bootstrap.
    pub fn new(
        persistence: Arc<dyn PersistenceManager>,
        root_id: NodeId,
        registry: &dyn NodeTypeRegistry,
    ) -> Result<Self> {
        let cache = Arc::new(ItemStateCache::new());
        let listener: Arc<dyn ItemStateListener> = Arc::new(CacheBinding {
            cache: Arc::clone(&cache),
        });
        let manager = Self {
            persistence,
            cache,
            listener,
            providers: Mutex::new(Arc::new(Vec::new())),
            root_id,
            root: OnceLock::new(),
            serial: Mutex::new(()),
            poisoned: AtomicBool::new(false),
        };

        let root = match manager.resolve_node(&root_id) {
            Ok(state) => state,
            Err(err) if err.is_no_such_item() => manager.create_root_node_state(registry)?,
            Err(err) => return Err(err),
        };
        let _ = manager.root.set(root);
        tracing::debug!(root = %root_id, "shared item-state manager ready");
        Ok(manager)
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    /// Hard reference to the root node state.
    pub fn root(&self) -> Option<Arc<ItemState>> {
        self.root.get().cloned()
    }

    /// True once a failed durable store left in-memory state ahead of the
    /// persistence layer; further commits are refused.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Appends a provider. Registration order is stable and defines overlay
    /// precedence.
    pub fn add_virtual_provider(&self, provider: Arc<dyn VirtualItemStateProvider>) {
        let mut slot = self
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(slot.len() + 1);
        next.extend(slot.iter().cloned());
        next.push(provider);
        *slot = Arc::new(next);
    }

    /// Resolves an item id to its shared state.
    ///
    /// Resolution order: virtual roots, then local (cache or persistence),
    /// then the providers in registration order. Provider failures during
    /// resolution degrade to `NoSuchItem`.
    pub fn get_item_state(&self, id: &ItemId) -> Result<Arc<ItemState>> {
        let _guard = self.serial();
        self.get_item_state_inner(id)
    }

    /// Same resolution order as `get_item_state`, but never fails:
    /// persistence probe errors are treated as "not present" and re-checked
    /// by the commit path.
    pub fn has_item_state(&self, id: &ItemId) -> bool {
        let _guard = self.serial();
        self.has_item_state_inner(id)
    }

    /// Loads the reference bundle of a target: persistence first, then the
    /// providers, then a fresh empty bundle. Bundles are not cached.
    pub fn get_node_references(&self, id: &NodeReferencesId) -> Result<NodeReferences> {
        let _guard = self.serial();
        self.get_node_references_inner(id)
    }

    /// Drops a state from the cache without destroying it; the next
    /// resolution reloads from persistence and re-registers the listener.
    pub fn evict(&self, id: &ItemId) {
        let _guard = self.serial();
        if let Some(state) = self.cache.evict(id) {
            state.remove_listener(&self.listener);
        }
    }

    pub fn is_cached(&self, id: &ItemId) -> bool {
        self.cache.is_cached(id)
    }

    /// Evicts every cached state and detaches the manager from all of them.
    pub fn dispose(&self) {
        let _guard = self.serial();
        for state in self.cache.evict_all() {
            state.remove_listener(&self.listener);
        }
        tracing::debug!("shared item-state manager disposed");
    }

    /// Writes the manager and cache state for diagnostics.
    pub fn dump(&self, sink: &mut dyn io::Write) -> io::Result<()> {
        writeln!(sink, "SharedItemStateManager (root {})", self.root_id)?;
        self.cache.dump(sink)
    }

    /// Commits a local change log.
    ///
    /// The items in `local` are not states returned by this manager; they
    /// are reconnected to their shared peers here. When an observation
    /// manager is supplied, events are derived from the pre-push view and
    /// dispatched strictly after the durable store.
    pub fn store(
        &self,
        local: &ChangeLog,
        observer: Option<&dyn ObservationManager>,
    ) -> Result<()> {
        let _guard = self.serial();
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(ItemStateError::Poisoned);
        }
        let span = tracing::debug_span!("store", root = %self.root_id);
        let _entered = span.enter();

        let providers = self.providers_snapshot();
        let mut shared = ChangeLog::new();
        let mut virtual_refs: Vec<NodeReferences> = Vec::new();

        // Modified reference targets may have been deleted concurrently.
        // Bundles owned by a virtual provider are set aside for the
        // post-commit handoff; the rest must resolve now or arrive in this
        // very log.
        'bundles: for refs in local.modified_refs() {
            let target = refs.target();
            let target_id = ItemId::Node(target);
            for provider in providers.iter() {
                if provider.has_item_state(&target_id) {
                    virtual_refs.push(refs.clone());
                    continue 'bundles;
                }
            }
            if refs.has_references()
                && local.get(&target_id).is_none()
                && !self.has_item_state_inner(&target_id)
            {
                return Err(ItemStateError::ReferentialIntegrity { target });
            }
            shared.modified_references(refs.clone());
        }

        // Reconnect every local item to its shared peer and collect the
        // peers into the shared change log.
        for transient in local.added_states() {
            let peer = self.create_shared_peer(transient)?;
            transient.connect(Arc::clone(&peer))?;
            shared.added(peer);
        }
        for transient in local.modified_states() {
            let peer = self.get_item_state_inner(transient.id())?;
            transient.connect(Arc::clone(&peer))?;
            shared.modified(peer);
        }
        for transient in local.deleted_states() {
            let peer = self.get_item_state_inner(transient.id())?;
            transient.connect(Arc::clone(&peer))?;
            shared.deleted(peer);
        }

        // Event derivation sees the pre-push snapshot only.
        let mut events = None;
        if let Some(observer) = observer {
            let mut collection = observer.create_event_state_collection();
            let view = SharedView { manager: self };
            collection.create_event_states(self.root_id, local, &view)?;
            collection.prepare();
            events = Some(collection);
        }

        // Push the local data into the shared states.
        local.push()?;

        // Durable store. A failure here leaves pushed in-memory state ahead
        // of the persistence layer: fatal, no rollback.
        if let Err(err) = self.persistence.store(&shared) {
            self.poisoned.store(true, Ordering::SeqCst);
            tracing::error!(error = %err, "durable store failed after push, manager poisoned");
            return Err(ItemStateError::Persistence {
                message: err.to_string(),
                fatal: true,
            });
        }

        // Publication: status transitions plus listener notifications. New
        // states enter the cache, destroyed states leave it.
        shared.persisted();

        // Hand virtual reference bundles to the first provider that takes
        // them. A mismatch here is a provider contract bug, not a user
        // error.
        'handoff: for refs in &virtual_refs {
            for provider in providers.iter() {
                if provider.set_node_references(refs) {
                    continue 'handoff;
                }
            }
            tracing::debug!(target = %refs.target(), "no provider accepted reference bundle");
        }

        if let Some(events) = events {
            events.dispatch();
        }
        tracing::debug!(log = ?local, "change log committed");
        Ok(())
    }

    fn serial(&self) -> MutexGuard<'_, ()> {
        self.serial.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn providers_snapshot(&self) -> ProviderList {
        Arc::clone(
            &self
                .providers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn get_item_state_inner(&self, id: &ItemId) -> Result<Arc<ItemState>> {
        let providers = self.providers_snapshot();
        for provider in providers.iter() {
            if provider.is_virtual_root(id) {
                return provider
                    .get_item_state(id)
                    .map_err(|err| provider_miss(id, err));
            }
        }
        if self.has_local(id) {
            return self.resolve_local(id);
        }
        for provider in providers.iter() {
            if provider.has_item_state(id) {
                return provider
                    .get_item_state(id)
                    .map_err(|err| provider_miss(id, err));
            }
        }
        Err(ItemStateError::NoSuchItem(id.clone()))
    }

    fn has_item_state_inner(&self, id: &ItemId) -> bool {
        if self.cache.is_cached(id) {
            return true;
        }
        let providers = self.providers_snapshot();
        for provider in providers.iter() {
            if provider.is_virtual_root(id) {
                return true;
            }
        }
        if self.has_local(id) {
            return true;
        }
        for provider in providers.iter() {
            if provider.has_item_state(id) {
                return true;
            }
        }
        false
    }

    fn get_node_references_inner(&self, id: &NodeReferencesId) -> Result<NodeReferences> {
        match self.persistence.load_references(id) {
            Ok(refs) => return Ok(refs),
            Err(err) if err.is_no_such_item() => {}
            Err(err) => return Err(err),
        }
        for provider in self.providers_snapshot().iter() {
            if let Ok(refs) = provider.get_node_references(id) {
                return Ok(refs);
            }
        }
        Ok(NodeReferences::new(*id))
    }

    fn resolve_local(&self, id: &ItemId) -> Result<Arc<ItemState>> {
        match id {
            ItemId::Node(node_id) => self.resolve_node(node_id),
            ItemId::Property(prop_id) => self.resolve_property(prop_id),
        }
    }

    fn resolve_node(&self, id: &NodeId) -> Result<Arc<ItemState>> {
        let item_id = ItemId::Node(*id);
        if let Some(state) = self.cache.retrieve(&item_id) {
            return Ok(state);
        }
        let data = self.persistence.load_node(id)?;
        let state = ItemState::node(*id, data, Status::Existing);
        self.cache.cache(Arc::clone(&state));
        state.add_listener(&self.listener);
        tracing::debug!(item = %item_id, "node state loaded");
        Ok(state)
    }

    fn resolve_property(&self, id: &PropertyId) -> Result<Arc<ItemState>> {
        let item_id = ItemId::Property(id.clone());
        if let Some(state) = self.cache.retrieve(&item_id) {
            return Ok(state);
        }
        let data = self.persistence.load_property(id)?;
        let state = ItemState::property(id.clone(), data, Status::Existing);
        self.cache.cache(Arc::clone(&state));
        state.add_listener(&self.listener);
        tracing::debug!(item = %item_id, "property state loaded");
        Ok(state)
    }

    fn has_local(&self, id: &ItemId) -> bool {
        if self.cache.is_cached(id) {
            return true;
        }
        match self.persistence.exists(id) {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(item = %id, error = %err, "existence probe failed, treating as absent");
                false
            }
        }
    }

    /// Fresh shared peer for an added transient state: identifying fields
    /// are copied now, everything else arrives at push.
    fn create_shared_peer(&self, transient: &Arc<ItemState>) -> Result<Arc<ItemState>> {
        let peer = match transient.id() {
            ItemId::Node(id) => {
                let peer = self.persistence.create_new_node(*id);
                let payload = transient.payload();
                let mut peer_payload = peer.payload_mut();
                if let (Some(src), Some(dst)) = (payload.as_node(), peer_payload.as_node_mut()) {
                    dst.set_parent(src.parent());
                    if let Some(primary_type) = src.primary_type() {
                        dst.set_primary_type(primary_type.clone());
                    }
                    if let Some(definition) = src.definition() {
                        dst.set_definition(definition);
                    }
                }
                drop(peer_payload);
                drop(payload);
                peer
            }
            ItemId::Property(id) => {
                let peer = self.persistence.create_new_property(id.clone());
                let payload = transient.payload();
                let mut peer_payload = peer.payload_mut();
                if let (Some(src), Some(dst)) =
                    (payload.as_property(), peer_payload.as_property_mut())
                {
                    dst.set_value_type(src.value_type());
                    dst.set_multi_valued(src.multi_valued());
                    if let Some(definition) = src.definition() {
                        dst.set_definition(definition);
                    }
                }
                drop(peer_payload);
                drop(payload);
                peer
            }
        };
        peer.add_listener(&self.listener);
        Ok(peer)
    }

    /// Builds and durably stores the root node: a `rep:root` node carrying
    /// a single-valued NAME property `jcr:primaryType` = `rep:root`. The
    /// property definition comes from `nt:base`, whose first property
    /// definition is `jcr:primaryType`.
    fn create_root_node_state(&self, registry: &dyn NodeTypeRegistry) -> Result<Arc<ItemState>> {
        let root = self.persistence.create_new_node(self.root_id);
        {
            let mut payload = root.payload_mut();
            if let Some(node) = payload.as_node_mut() {
                node.set_primary_type(name::rep_root().clone());
                node.set_definition(registry.root_node_def()?);
                node.add_property_entry(name::jcr_primary_type().clone());
            }
        }
        root.add_listener(&self.listener);

        let base = registry.node_type_def(name::nt_base())?;
        let prop_def = base
            .property_defs
            .first()
            .filter(|def| def.name == *name::jcr_primary_type())
            .ok_or_else(|| SchemaError::MissingPrimaryTypeDefinition {
                node_type: name::nt_base().clone(),
            })?;

        let prop = self
            .persistence
            .create_new_property(PropertyId::new(self.root_id, name::jcr_primary_type().clone()));
        {
            let mut payload = prop.payload_mut();
            if let Some(data) = payload.as_property_mut() {
                data.set_value_type(ValueType::Name);
                data.set_multi_valued(false);
                data.set_value(Value::Name(name::rep_root().clone()));
                data.set_definition(prop_def.id);
            }
        }
        prop.add_listener(&self.listener);

        let mut log = ChangeLog::new();
        log.added(Arc::clone(&root));
        log.added(prop);
        self.persistence.store(&log)?;
        log.persisted();

        tracing::info!(root = %self.root_id, "repository root created");
        Ok(root)
    }
}

impl std::fmt::Debug for SharedItemStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedItemStateManager")
            .field("root", &self.root_id)
            .field("cached", &self.cache.len())
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

/// The manager as an event-derivation source: the shared, pre-push view.
struct SharedView<'a> {
    manager: &'a SharedItemStateManager,
}

impl ItemStateSource for SharedView<'_> {
    fn item_state(&self, id: &ItemId) -> Option<Arc<ItemState>> {
        self.manager.get_item_state_inner(id).ok()
    }
}

fn provider_miss(id: &ItemId, err: ItemStateError) -> ItemStateError {
    if err.is_no_such_item() {
        return ItemStateError::NoSuchItem(id.clone());
    }
    // Providers are best-effort overlays: a failing provider resolves to
    // "no such item" at this layer.
    tracing::warn!(item = %id, error = %err, "virtual provider failed during resolution");
    ItemStateError::NoSuchItem(id.clone())
}
