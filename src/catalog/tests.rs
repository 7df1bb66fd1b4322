#[cfg(test)]
mod tests {
    use crate::catalog::{
        Dtable, FragmentStatus, MemoryCatalog, MetaCatalog, Node, NodeHealth, TableStatus,
    };

    fn node(id: u64) -> Node {
        Node::new(id, format!("127.0.0.1:{}", 7000 + id).parse().unwrap())
    }

    fn template(name: &str, fragments: u32) -> Dtable {
        Dtable {
            table_id: 0,
            namespace: "ns".to_string(),
            table_name: name.to_string(),
            status: TableStatus::Normal,
            dispatcher: "default".to_string(),
            fragment_count: fragments,
        }
    }

    #[tokio::test]
    async fn test_create_table_is_idempotent_by_name() {
        let catalog = MemoryCatalog::with_nodes([node(1)]);

        let first = catalog.create_table(template("t", 2)).await.unwrap();
        let second = catalog.create_table(template("t", 8)).await.unwrap();

        assert_eq!(first.table_id, second.table_id);
        assert_eq!(second.fragment_count, 2, "Second create must observe the first table");
        assert_eq!(catalog.table_count(), 1);
    }

    #[tokio::test]
    async fn test_fragments_are_spread_round_robin() {
        let catalog = MemoryCatalog::with_nodes([node(1), node(2), node(3)]);
        let table = catalog.create_table(template("spread", 6)).await.unwrap();

        let fragments = catalog.create_fragments_for_table(&table).await.unwrap();

        let placement: Vec<u64> = fragments.iter().map(|f| f.node_id).collect();
        assert_eq!(placement, vec![1, 2, 3, 1, 2, 3]);
        assert!(fragments.iter().all(|f| f.status == FragmentStatus::Normal));

        // Second call returns the existing fragments instead of adding more.
        let again = catalog.create_fragments_for_table(&table).await.unwrap();
        assert_eq!(again.len(), 6);
    }

    #[tokio::test]
    async fn test_fragment_creation_needs_a_healthy_node() {
        let catalog = MemoryCatalog::with_nodes([node(1)]);
        catalog.set_node_health(1, NodeHealth::Unhealthy);
        let table = catalog.create_table(template("orphan", 2)).await.unwrap();

        assert!(catalog.create_fragments_for_table(&table).await.is_err());
    }

    #[tokio::test]
    async fn test_storage_nodes_exclude_unhealthy() {
        let catalog = MemoryCatalog::with_nodes([node(1), node(2)]);
        let table = catalog.create_table(template("health", 4)).await.unwrap();
        catalog.create_fragments_for_table(&table).await.unwrap();

        catalog.set_node_health(2, NodeHealth::Unhealthy);
        let nodes = catalog
            .get_storage_nodes_by_table_id(table.table_id)
            .await
            .unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, 1);
    }

    #[tokio::test]
    async fn test_renaming_table_frees_the_old_name() {
        let catalog = MemoryCatalog::with_nodes([node(1)]);
        let mut table = catalog.create_table(template("reused", 1)).await.unwrap();

        table.status = TableStatus::Deleted;
        table.table_name = "reused-123".to_string();
        catalog.update_table(table.clone()).await.unwrap();

        assert!(catalog.get_table("ns", "reused").await.unwrap().is_none());
        let renamed = catalog.get_table("ns", "reused-123").await.unwrap().unwrap();
        assert_eq!(renamed.status, TableStatus::Deleted);

        let fresh = catalog.create_table(template("reused", 1)).await.unwrap();
        assert_ne!(fresh.table_id, table.table_id);
    }

    #[tokio::test]
    async fn test_update_fragment_status() {
        let catalog = MemoryCatalog::with_nodes([node(1)]);
        let table = catalog.create_table(template("frag", 2)).await.unwrap();
        let mut fragments = catalog.create_fragments_for_table(&table).await.unwrap();

        fragments[1].status = FragmentStatus::Deleted;
        let updated = catalog.update_fragment(fragments[1].clone()).await.unwrap();

        assert!(updated.is_some());
        let stored = catalog.get_fragments_by_table_id(table.table_id).await.unwrap();
        assert_eq!(stored[0].status, FragmentStatus::Normal);
        assert_eq!(stored[1].status, FragmentStatus::Deleted);
    }
}
