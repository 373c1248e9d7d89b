//! Table Set Clone Tests
//!
//! Cloning tenant tables on a real SQLite database.

use mtc_core::prelude::*;
use mtc_core::{CloneError, SqlValue, Statement};
use mtc_test_utils::{tenant, Network};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn cloner(net: &Network) -> TableSetCloner {
    TableSetCloner::new(net.executor(), &CloneConfig::default())
}

async fn index_names(net: &Network, prefix: &str) -> Vec<String> {
    let stmt = Statement::new(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND sql IS NOT NULL \
         AND substr(tbl_name, 1, length(?1)) = ?1 ORDER BY name",
    )
    .bind(prefix);
    net.db
        .query_column(&stmt)
        .await
        .unwrap()
        .into_iter()
        .filter_map(SqlValue::into_text)
        .collect()
}

#[tokio::test]
async fn test_clone_copies_every_tenant_table() {
    let net = Network::new(true);
    let bravo = tenant(5, "bravo");

    let report = cloner(&net).clone(&net.alpha, &bravo).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.dest_prefix, "wp_5_");
    let source_tables = net.tables("wp_2_").await;
    let logical: Vec<_> = source_tables.iter().map(|t| t.replacen("wp_2_", "", 1)).collect();
    let cloned: Vec<_> = net
        .tables("wp_5_")
        .await
        .iter()
        .map(|t| t.replacen("wp_5_", "", 1))
        .collect();
    assert_eq!(cloned, logical);
    assert!(cloned.contains(&"shop_sessions".to_string()));

    let mut source_rows = 0;
    for table in &source_tables {
        let dest = table.replacen("wp_2_", "wp_5_", 1);
        let rows = net.count(table).await;
        assert_eq!(rows, net.count(&dest).await, "{dest}");
        source_rows += rows;
    }
    assert_eq!(report.rows(), u64::try_from(source_rows).unwrap());
}

#[tokio::test]
async fn test_clone_recreates_indexes() {
    let net = Network::new(true);
    cloner(&net).clone(&net.alpha, &tenant(5, "bravo")).await.unwrap();

    assert_eq!(
        index_names(&net, "wp_5_").await,
        vec![
            "wp_5_options_option_name".to_string(),
            "wp_5_postmeta_post_id".to_string(),
            "wp_5_posts_type".to_string(),
        ]
    );

    // unique index survived the copy
    let dup = Statement::new("INSERT INTO wp_5_options (option_name, option_value) VALUES ('home', 'x')");
    assert!(net.db.execute(&dup).await.is_err());
}

#[tokio::test]
async fn test_primary_clone_uses_manifest_tables_only() {
    let net = Network::new(true);
    let gamma = tenant(3, "gamma");

    let report = cloner(&net).clone(&net.primary, &gamma).await.unwrap();

    assert!(report.is_complete());
    let manifest = TenantTableSet::default_manifest();
    let expected: Vec<_> = manifest.tables().map(|t| gamma.table(t)).collect();
    let cloned: Vec<_> = report.tables.iter().map(|t| t.dest.clone()).collect();
    assert_eq!(cloned, expected);

    let tables = net.tables("wp_3_").await;
    assert!(!tables.contains(&"wp_3_users".to_string()));
    assert!(!tables.contains(&"wp_3_blogs".to_string()));
    assert_eq!(net.count("wp_3_posts").await, 3);
}

#[tokio::test]
async fn test_clone_skips_tables_with_destination_prefix() {
    let net = Network::new(true);
    // wp_2_1_ tables share the wp_2_ prefix
    let nested = TenantContext::new(TenantId(21), "wp_2_1_");
    net.db
        .execute_batch("CREATE TABLE wp_2_1_posts (ID INTEGER PRIMARY KEY)")
        .unwrap();

    let tables = cloner(&net).source_tables(&net.alpha, &nested).await.unwrap();

    assert!(tables.contains(&"wp_2_posts".to_string()));
    assert!(!tables.iter().any(|t| t.starts_with("wp_2_1_")));
}

#[tokio::test]
async fn test_reclone_replaces_existing_destination() {
    let net = Network::new(true);
    let bravo = tenant(5, "bravo");
    let cloner = cloner(&net);

    cloner.clone(&net.alpha, &bravo).await.unwrap();
    net.db
        .execute_batch("INSERT INTO wp_5_posts (ID, post_title) VALUES (99, 'stale')")
        .unwrap();
    let again = cloner.clone(&net.alpha, &bravo).await.unwrap();

    assert!(again.is_complete());
    assert_eq!(net.count("wp_5_posts").await, net.count("wp_2_posts").await);
}

#[tokio::test]
async fn test_clone_rejects_shared_prefix() {
    let net = Network::new(true);
    let err = cloner(&net).clone(&net.alpha, &net.alpha).await.unwrap_err();
    assert!(matches!(err, CloneError::SamePrefix(prefix) if prefix == "wp_2_"));

    let empty = TenantContext::new(TenantId(9), "");
    let err = cloner(&net).clone(&net.alpha, &empty).await.unwrap_err();
    assert!(matches!(err, CloneError::EmptyPrefix(TenantId(9))));
}

#[tokio::test]
async fn test_missing_source_table_is_reported_not_fatal() {
    let net = Network::new(true);
    let manifest = TenantTableSet::new()
        .with_table("posts", ["post_content"])
        .with_table("not_there", Vec::<String>::new());
    let config = CloneConfig::default().with_manifest(manifest);
    let cloner = TableSetCloner::new(net.executor(), &config);

    let report = cloner.clone(&net.primary, &tenant(3, "gamma")).await.unwrap();

    assert_eq!(report.tables.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].table(), "wp_3_not_there");
}

#[tokio::test]
async fn test_drop_tenant_removes_only_its_tables() {
    let net = Network::new(true);
    let bravo = tenant(5, "bravo");
    let cloner = cloner(&net);
    cloner.clone(&net.alpha, &bravo).await.unwrap();
    let alpha_tables = net.tables("wp_2_").await;

    let report = cloner.drop_tenant(&bravo).await.unwrap();

    assert_eq!(report.dropped.len(), alpha_tables.len());
    assert!(report.failures.is_empty());
    assert!(net.tables("wp_5_").await.is_empty());
    assert_eq!(net.tables("wp_2_").await, alpha_tables);
    assert_eq!(net.count("wp_users").await, 1);
}

#[tokio::test]
async fn test_drop_tenant_refuses_primary() {
    let net = Network::new(true);
    let err = cloner(&net).drop_tenant(&net.primary).await.unwrap_err();
    assert!(matches!(err, CloneError::PrimaryTenant(TenantId(1))));
    assert_eq!(net.count("wp_posts").await, 3);
}

#[tokio::test]
async fn test_parallel_clone_matches_sequential() {
    let net = Network::new(true);
    let config = CloneConfig::default().with_table_concurrency(4);
    let parallel = TableSetCloner::new(Arc::clone(&net.db) as Arc<dyn SqlExecutor>, &config);

    let report = parallel.clone(&net.alpha, &tenant(5, "bravo")).await.unwrap();

    assert!(report.is_complete());
    let order: Vec<_> = report.tables.iter().map(|t| t.source.clone()).collect();
    assert_eq!(order, net.tables("wp_2_").await);
}
