use crate::catalog::{Dtable, Fragment, FragmentStatus, MetaCatalog, Node, StoreInfo};
use crate::error::{DataPlaneError, Result};

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Name under which [`ModDispatchPolicy`] is registered.
pub const DEFAULT_POLICY: &str = "default";

/// Maps a key to a shard index in `0..fragment_count`. Must be a pure function.
pub trait DispatchPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn shard_for(&self, key: &str, fragment_count: u32) -> u32;
}

/// `hash(key) mod fragment_count`.
///
/// Stable for a fixed fragment count only; changing the count moves keys.
pub struct ModDispatchPolicy;

impl DispatchPolicy for ModDispatchPolicy {
    fn name(&self) -> &str {
        DEFAULT_POLICY
    }

    fn shard_for(&self, key: &str, fragment_count: u32) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(fragment_count.max(1))) as u32
    }
}

/// A key resolved to the fragment that owns it and the node hosting that fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    /// The requested store narrowed to the resolved fragment.
    pub store: StoreInfo,
    pub node: Node,
}

/// A fragment of a table paired with where to reach it, or why it can't be reached.
#[derive(Debug)]
pub struct FragmentRoute {
    pub fragment: Fragment,
    pub target: Result<DispatchResult>,
}

/// Resolves keys and whole tables to fragment/node pairs through the catalog.
pub struct Dispatcher {
    catalog: Arc<dyn MetaCatalog>,
    policies: HashMap<String, Arc<dyn DispatchPolicy>>,
    fallback: Arc<dyn DispatchPolicy>,
}

impl Dispatcher {
    pub fn new(catalog: Arc<dyn MetaCatalog>) -> Self {
        let fallback: Arc<dyn DispatchPolicy> = Arc::new(ModDispatchPolicy);
        let mut policies = HashMap::new();
        policies.insert(fallback.name().to_string(), fallback.clone());

        Self {
            catalog,
            policies,
            fallback,
        }
    }

    pub fn register_policy(&mut self, policy: Arc<dyn DispatchPolicy>) {
        self.policies.insert(policy.name().to_string(), policy);
    }

    pub fn catalog(&self) -> &Arc<dyn MetaCatalog> {
        &self.catalog
    }

    fn policy_for(&self, table: &Dtable) -> &Arc<dyn DispatchPolicy> {
        match self.policies.get(&table.dispatcher) {
            Some(policy) => policy,
            None => {
                tracing::warn!(
                    "Unknown dispatcher '{}' on {}/{}, using {}",
                    table.dispatcher,
                    table.namespace,
                    table.table_name,
                    self.fallback.name()
                );
                &self.fallback
            }
        }
    }

    /// Looks the table up by name. Deleted tables are treated as absent.
    pub async fn live_table(&self, store: &StoreInfo) -> Result<Dtable> {
        match self.catalog.get_table(&store.namespace, &store.table).await? {
            Some(table) if table.is_normal() => Ok(table),
            _ => Err(DataPlaneError::StorageNotFound {
                namespace: store.namespace.clone(),
                table: store.table.clone(),
            }),
        }
    }

    pub fn resolve_shard(&self, table: &Dtable, key: &str) -> u32 {
        self.policy_for(table).shard_for(key, table.fragment_count)
    }

    /// Resolves a single key of `store` to its fragment and hosting node.
    pub async fn resolve(&self, store: &StoreInfo, key: &str) -> Result<DispatchResult> {
        let table = self.live_table(store).await?;
        let shard = self.resolve_shard(&table, key);

        let fragments = self.catalog.get_fragments_by_table_id(table.table_id).await?;
        let fragment = fragments
            .into_iter()
            .find(|f| f.fragment_order == shard && f.status == FragmentStatus::Normal)
            .ok_or_else(|| {
                DataPlaneError::IllegalState(format!("{} has no live fragment {}", store, shard))
            })?;

        let nodes = self.catalog.get_storage_nodes_by_table_id(table.table_id).await?;
        let target = route(store, &fragment, &nodes)?;

        tracing::trace!("Dispatched key of {} to {} on node {}", store, target.store, target.node.node_id);
        Ok(target)
    }

    /// Every live fragment of `table` with the healthy node hosting it.
    pub async fn resolve_fragments(&self, table: &Dtable) -> Result<Vec<FragmentRoute>> {
        let store = StoreInfo::new(&table.namespace, &table.table_name);
        let fragments = self.catalog.get_fragments_by_table_id(table.table_id).await?;
        let nodes = self.catalog.get_storage_nodes_by_table_id(table.table_id).await?;

        Ok(fragments
            .into_iter()
            .filter(|f| f.status == FragmentStatus::Normal)
            .map(|fragment| {
                let target = route(&store, &fragment, &nodes);
                FragmentRoute { fragment, target }
            })
            .collect())
    }
}

fn route(store: &StoreInfo, fragment: &Fragment, healthy: &[Node]) -> Result<DispatchResult> {
    healthy
        .iter()
        .find(|node| node.node_id == fragment.node_id)
        .map(|node| DispatchResult {
            store: store.with_fragment(fragment.fragment_order),
            node: node.clone(),
        })
        .ok_or(DataPlaneError::NodeUnavailable {
            node_id: fragment.node_id,
            fragment: fragment.fragment_order,
        })
}
