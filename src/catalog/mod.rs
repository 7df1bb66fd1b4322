//! Metadata Catalog Module
//!
//! The catalog of tables, fragments and nodes is an external collaborator. The
//! data plane only consumes it through the [`MetaCatalog`] trait: lookup a table by
//! name, list a table's fragments and healthy nodes, and update fragment/table
//! status.
//!
//! [`MemoryCatalog`] is the in-process backend used by a standalone node and by
//! tests.

pub mod memory;
pub mod types;

pub use memory::MemoryCatalog;
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait MetaCatalog: Send + Sync {
    async fn get_table(&self, namespace: &str, table_name: &str) -> Result<Option<Dtable>>;

    /// Registers a new table. `table_id` of the template is ignored and assigned.
    async fn create_table(&self, template: Dtable) -> Result<Dtable>;

    /// Creates `fragment_count` fragments for `table`, placed over healthy nodes.
    async fn create_fragments_for_table(&self, table: &Dtable) -> Result<Vec<Fragment>>;

    async fn get_fragments_by_table_id(&self, table_id: u64) -> Result<Vec<Fragment>>;

    /// Healthy nodes hosting at least one fragment of the table.
    async fn get_storage_nodes_by_table_id(&self, table_id: u64) -> Result<Vec<Node>>;

    async fn update_fragment(&self, fragment: Fragment) -> Result<Option<Fragment>>;

    async fn update_table(&self, table: Dtable) -> Result<Option<Dtable>>;
}

#[cfg(test)]
mod tests;
