use super::MetaCatalog;
use super::types::*;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-process catalog backed by concurrent maps.
pub struct MemoryCatalog {
    tables: DashMap<u64, Dtable>,
    /// `(namespace, table_name) -> table_id` for live names.
    names: DashMap<(String, String), u64>,
    fragments: DashMap<u64, Vec<Fragment>>,
    nodes: DashMap<u64, Node>,
    next_id: AtomicU64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            names: DashMap::new(),
            fragments: DashMap::new(),
            nodes: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let catalog = Self::new();
        for node in nodes {
            catalog.register_node(node);
        }
        catalog
    }

    pub fn register_node(&self, node: Node) {
        tracing::info!("Registered storage node {} at {}", node.node_id, node.addr);
        self.nodes.insert(node.node_id, node);
    }

    pub fn set_node_health(&self, node_id: u64, health: NodeHealth) -> bool {
        match self.nodes.get_mut(&node_id) {
            Some(mut node) => {
                node.health = health;
                true
            }
            None => false,
        }
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn healthy_node_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .nodes
            .iter()
            .filter(|entry| entry.value().is_healthy())
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetaCatalog for MemoryCatalog {
    async fn get_table(&self, namespace: &str, table_name: &str) -> Result<Option<Dtable>> {
        let key = (namespace.to_string(), table_name.to_string());
        Ok(self
            .names
            .get(&key)
            .and_then(|id| self.tables.get(id.value()).map(|table| table.value().clone())))
    }

    async fn create_table(&self, template: Dtable) -> Result<Dtable> {
        let key = (template.namespace.clone(), template.table_name.clone());

        // The name entry is the creation point; a concurrent create of the same
        // name observes the first table.
        let table_id = *self.names.entry(key).or_insert_with(|| {
            let table_id = self.next_id();
            let mut table = template.clone();
            table.table_id = table_id;
            self.tables.insert(table_id, table);
            table_id
        });

        self.tables
            .get(&table_id)
            .map(|table| table.value().clone())
            .ok_or_else(|| anyhow::anyhow!("Table {} vanished during creation", table_id))
    }

    async fn create_fragments_for_table(&self, table: &Dtable) -> Result<Vec<Fragment>> {
        let node_ids = self.healthy_node_ids();
        if node_ids.is_empty() {
            return Err(anyhow::anyhow!(
                "No healthy nodes to place fragments of {}/{}",
                table.namespace,
                table.table_name
            ));
        }

        let mut entry = self.fragments.entry(table.table_id).or_default();
        if !entry.is_empty() {
            return Ok(entry.value().clone());
        }

        // Same placement rule as partition ownership: order modulo sorted node ids.
        for order in 0..table.fragment_count {
            let node_id = node_ids[(order as usize) % node_ids.len()];
            entry.push(Fragment {
                fragment_id: self.next_id(),
                table_id: table.table_id,
                fragment_order: order,
                node_id,
                status: FragmentStatus::Normal,
            });
        }

        tracing::info!(
            "Created {} fragments for {}/{} over {} nodes",
            table.fragment_count,
            table.namespace,
            table.table_name,
            node_ids.len()
        );

        Ok(entry.value().clone())
    }

    async fn get_fragments_by_table_id(&self, table_id: u64) -> Result<Vec<Fragment>> {
        Ok(self
            .fragments
            .get(&table_id)
            .map(|fragments| fragments.value().clone())
            .unwrap_or_default())
    }

    async fn get_storage_nodes_by_table_id(&self, table_id: u64) -> Result<Vec<Node>> {
        let fragments = self.get_fragments_by_table_id(table_id).await?;
        let mut node_ids: Vec<u64> = fragments.iter().map(|f| f.node_id).collect();
        node_ids.sort_unstable();
        node_ids.dedup();

        Ok(node_ids
            .into_iter()
            .filter_map(|id| self.nodes.get(&id).map(|node| node.value().clone()))
            .filter(|node| node.is_healthy())
            .collect())
    }

    async fn update_fragment(&self, fragment: Fragment) -> Result<Option<Fragment>> {
        let Some(mut fragments) = self.fragments.get_mut(&fragment.table_id) else {
            return Ok(None);
        };

        match fragments
            .iter_mut()
            .find(|existing| existing.fragment_id == fragment.fragment_id)
        {
            Some(existing) => {
                *existing = fragment.clone();
                Ok(Some(fragment))
            }
            None => Ok(None),
        }
    }

    async fn update_table(&self, table: Dtable) -> Result<Option<Dtable>> {
        let previous = match self.tables.get(&table.table_id) {
            Some(previous) => previous.value().clone(),
            None => return Ok(None),
        };

        if previous.namespace != table.namespace || previous.table_name != table.table_name {
            self.names
                .remove(&(previous.namespace.clone(), previous.table_name.clone()));
            self.names.insert(
                (table.namespace.clone(), table.table_name.clone()),
                table.table_id,
            );
        }

        self.tables.insert(table.table_id, table.clone());
        Ok(Some(table))
    }
}
