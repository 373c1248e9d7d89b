//! Reference Rewrite Tests
//!
//! Rewrites run against a cloned tenant in SQLite.

use mtc_core::prelude::*;
use mtc_core::{RewriteReport, RowRewriter, SqlError, SqlValue, Statement};
use mtc_serial::{decode, encoding_depth, looks_serialized, EncodingDepth, ValueRewriter};
use mtc_test_utils::{tenant, Network};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const ALPHA_UPLOADS: &str = "https://alpha.net.test/wp-content/uploads/sites/2";
const BRAVO_UPLOADS: &str = "https://bravo.net.test/wp-content/uploads/sites/5";

/// Clone alpha into bravo and run the rewrite pass with `config`
async fn cloned(link_manager_enabled: bool, config: CloneConfig) -> (Network, TenantContext, RewriteReport) {
    let net = Network::new(link_manager_enabled);
    let bravo = tenant(5, "bravo");
    TableSetCloner::new(net.executor(), &config)
        .clone(&net.alpha, &bravo)
        .await
        .unwrap();

    let inputs = RewriteInputs {
        source: net.alpha.clone(),
        dest: bravo.clone(),
        link_manager_enabled,
    };
    let report = ReferenceRewritePass::new(net.executor(), &config)
        .run(&inputs)
        .await
        .unwrap();
    (net, bravo, report)
}

#[tokio::test]
async fn test_plain_urls_and_prefix_are_rewritten() {
    let (net, bravo, report) = cloned(true, CloneConfig::default()).await;

    assert_eq!(net.option(&bravo, "siteurl").await.as_deref(), Some("https://bravo.net.test"));
    assert_eq!(net.option(&bravo, "home").await.as_deref(), Some("https://bravo.net.test"));
    assert!(net.option(&bravo, "wp_5_user_roles").await.is_some());
    assert!(net.option(&bravo, "wp_2_user_roles").await.is_none());

    assert_eq!(
        net.cell("wp_5_posts", "post_content", "ID = 1").await,
        "<a href=\"https://bravo.net.test/about\">About us</a>"
    );
    assert_eq!(
        net.cell("wp_5_posts", "guid", "ID = 2").await,
        format!("{BRAVO_UPLOADS}/2024/05/shop-logo.png")
    );
    assert!(report.failed_columns().next().is_none());
}

#[tokio::test]
async fn test_upload_url_rewritten_before_base_url() {
    let (net, _, _) = cloned(true, CloneConfig::default()).await;

    for value in net.column("wp_5_postmeta", "meta_value").await {
        assert!(!value.contains(ALPHA_UPLOADS), "{value}");
        // base-first would leave `.../sites/2` behind the new base
        assert!(!value.contains("wp-content/uploads/sites/2"), "{value}");
    }
    assert_eq!(
        net.cell("wp_5_postmeta", "meta_value", "meta_id = 2").await,
        format!("{BRAVO_UPLOADS}/2024/05/shop-logo.png")
    );
}

#[tokio::test]
async fn test_value_already_holding_target_keeps_other_references() {
    let (net, _, _) = cloned(true, CloneConfig::default()).await;

    // After the upload rewrite the content holds the new base URL, so the
    // base substitution leaves the link untouched.
    let content = net.cell("wp_5_posts", "post_content", "ID = 3").await;
    assert_eq!(
        content,
        format!("<a href=\"https://alpha.net.test/\"><img src=\"{BRAVO_UPLOADS}/a.png\"></a>")
    );
}

#[tokio::test]
async fn test_identical_values_are_updated_together() {
    let (_, _, report) = cloned(true, CloneConfig::default()).await;

    let meta = report
        .columns
        .iter()
        .find(|c| c.table == "wp_5_postmeta" && c.column == "meta_value")
        .unwrap();
    // meta_id 2 and 3 share a value: one update, two rows
    assert_eq!(meta.rewritten, 2);
    assert_eq!(meta.rows_updated, 3);
}

#[tokio::test]
async fn test_serialized_values_stay_decodable() {
    let (net, bravo, _) = cloned(true, CloneConfig::default()).await;

    let mods = net.option(&bravo, "theme_mods_storefront").await.unwrap();
    assert_eq!(mods, mtc_test_utils::theme_mods(&bravo));
    let decoded = decode(&mods).unwrap();
    let header = decoded.fields().unwrap()[1].1.fields().unwrap();
    assert_eq!(
        header[0].1.as_str(),
        Some(format!("{BRAVO_UPLOADS}/2024/05/shop-logo.png").as_str())
    );

    for value in net.column("wp_5_options", "option_value").await {
        if looks_serialized(&value) && !value.starts_with("a:2:{i:0;") {
            assert!(decode(&value).is_ok(), "{value}");
        }
    }

    let session = net.cell("wp_5_shop_sessions", "session_value", "session_key = 's1'").await;
    assert_eq!(session, "a:1:{s:8:\"cart_url\";s:27:\"https://bravo.net.test/cart\";}");
}

#[tokio::test]
async fn test_double_encoding_is_preserved() {
    let (net, bravo, _) = cloned(true, CloneConfig::default()).await;

    let widget = net.option(&bravo, "widget_custom").await.unwrap();
    assert_eq!(encoding_depth(&widget).unwrap(), EncodingDepth::Double);
    assert_eq!(widget, mtc_test_utils::double_encoded_widget(&bravo));
}

#[tokio::test]
async fn test_malformed_value_is_skipped() {
    let (net, bravo, report) = cloned(true, CloneConfig::default()).await;

    let blob = net.option(&bravo, "broken_blob").await.unwrap();
    assert_eq!(blob, "a:2:{i:0;s:22:\"https://alpha.net.test\";}");
    assert_eq!(report.skipped_values(), 1);
    assert!(report.failed_columns().next().is_none());
}

#[tokio::test]
async fn test_match_is_case_sensitive() {
    let (net, bravo, _) = cloned(true, CloneConfig::default()).await;
    assert_eq!(
        net.option(&bravo, "shouty").await.as_deref(),
        Some("HTTPS://ALPHA.NET.TEST")
    );
}

#[tokio::test]
async fn test_link_columns_follow_manifest_when_link_manager_enabled() {
    let (net, _, report) = cloned(true, CloneConfig::default()).await;

    assert_eq!(net.cell("wp_5_links", "link_url", "link_id = 1").await, "https://bravo.net.test/blogroll");
    assert_eq!(net.cell("wp_5_links", "link_image", "link_id = 1").await, format!("{BRAVO_UPLOADS}/link.png"));
    assert_eq!(net.cell("wp_5_links", "link_notes", "link_id = 1").await, "See https://alpha.net.test/notes");
    let link_columns: Vec<_> = report
        .columns
        .iter()
        .filter(|c| c.table == "wp_5_links")
        .map(|c| c.column.as_str())
        .collect();
    assert_eq!(link_columns, vec!["link_url", "link_image"]);
}

#[tokio::test]
async fn test_link_table_rewritten_whole_when_link_manager_disabled() {
    let (net, _, report) = cloned(false, CloneConfig::default()).await;

    assert_eq!(net.cell("wp_5_links", "link_notes", "link_id = 1").await, "See https://bravo.net.test/notes");
    let link_columns = report.columns.iter().filter(|c| c.table == "wp_5_links").count();
    assert_eq!(link_columns, 5);
}

#[tokio::test]
async fn test_override_leaves_empty_manifest_tables_alone() {
    let (net, _, report) = cloned(true, CloneConfig::default()).await;

    assert_eq!(
        net.cell("wp_5_comments", "comment_content", "comment_ID = 1").await,
        "Great shop at https://alpha.net.test"
    );
    assert!(!report.columns.iter().any(|c| c.table == "wp_5_comments"));
}

#[tokio::test]
async fn test_augment_adds_discovered_columns() {
    let config = CloneConfig::default().with_merge(ManifestMerge::Augment);
    let (net, _, report) = cloned(true, config).await;

    assert_eq!(
        net.cell("wp_5_comments", "comment_content", "comment_ID = 1").await,
        "Great shop at https://bravo.net.test"
    );
    assert_eq!(
        net.cell("wp_5_term_taxonomy", "description", "term_taxonomy_id = 1").await,
        "Posts at https://bravo.net.test"
    );
    let post_columns: Vec<_> = report
        .columns
        .iter()
        .filter(|c| c.table == "wp_5_posts")
        .map(|c| c.column.as_str())
        .collect();
    assert_eq!(post_columns[..2], ["post_content", "guid"]);
    assert_eq!(post_columns.len(), 5);
}

#[tokio::test]
async fn test_missing_manifest_column_is_reported() {
    let manifest = TenantTableSet::default_manifest().with_table("posts", ["post_content", "post_excerpt"]);
    let config = CloneConfig::default().with_manifest(manifest);
    let (_, _, report) = cloned(true, config).await;

    assert_eq!(report.missing_columns.len(), 1);
    assert_eq!(report.missing_columns[0].table, "posts");
    assert_eq!(report.missing_columns[0].column, "post_excerpt");
}

#[tokio::test]
async fn test_rerun_is_a_no_op() {
    let net = Network::new(true);
    let bravo = tenant(5, "bravo");
    let config = CloneConfig::default();
    TableSetCloner::new(net.executor(), &config)
        .clone(&net.alpha, &bravo)
        .await
        .unwrap();
    let pass = ReferenceRewritePass::new(net.executor(), &config);
    let inputs = RewriteInputs {
        source: net.alpha.clone(),
        dest: bravo,
        link_manager_enabled: true,
    };

    pass.run(&inputs).await.unwrap();
    let before = net.column("wp_5_options", "option_value").await;
    let again = pass.run(&inputs).await.unwrap();

    // values still holding the old URL are either blocked or undecodable
    assert_eq!(net.column("wp_5_options", "option_value").await, before);
    assert_eq!(again.rows_updated(), 0);
}

#[tokio::test]
async fn test_primary_prefix_rewrite_does_not_stack() {
    let net = Network::new(true);
    let gamma = tenant(3, "gamma");
    let config = CloneConfig::default();
    TableSetCloner::new(net.executor(), &config)
        .clone(&net.primary, &gamma)
        .await
        .unwrap();
    let inputs = RewriteInputs {
        source: net.primary.clone(),
        dest: gamma.clone(),
        link_manager_enabled: true,
    };
    ReferenceRewritePass::new(net.executor(), &config).run(&inputs).await.unwrap();

    assert!(net.option(&gamma, "wp_3_user_roles").await.is_some());
    assert_eq!(
        net.option(&gamma, "theme_mods_storefront").await.unwrap(),
        mtc_test_utils::theme_mods(&gamma)
    );
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

#[tokio::test]
async fn test_binary_and_non_utf8_cells_are_rewritten() {
    let net = Network::new(true);
    net.db
        .execute_batch(
            "CREATE TABLE wp_5_meta (meta_id INTEGER PRIMARY KEY, v TEXT);
             INSERT INTO wp_5_meta VALUES (1, CAST(X'E9' || 'https://old.test/x' AS TEXT));
             INSERT INTO wp_5_meta VALUES (2, CAST('https://old.test/y' AS BLOB));",
        )
        .unwrap();

    let report = RowRewriter::new(net.executor(), ValueRewriter::new())
        .rewrite_column("wp_5_meta", "v", "https://old.test", "https://new.test")
        .await;

    assert_eq!((report.candidates, report.rewritten, report.rows_updated), (2, 2, 2));
    assert!(report.is_clean());
    let cells = net
        .db
        .query_column(&Statement::new(
            "SELECT typeof(v) || ':' || hex(v) FROM wp_5_meta ORDER BY meta_id",
        ))
        .await
        .unwrap();
    assert_eq!(
        cells,
        vec![
            SqlValue::from(format!("text:E9{}", hex(b"https://new.test/x"))),
            SqlValue::from(format!("blob:{}", hex(b"https://new.test/y"))),
        ]
    );
}

/// Executor whose table listing always fails
struct BrokenCatalog(Arc<dyn SqlExecutor>);

#[async_trait::async_trait]
impl SqlExecutor for BrokenCatalog {
    fn dialect(&self) -> Dialect {
        self.0.dialect()
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, SqlError> {
        self.0.execute(statement).await
    }

    async fn query(
        &self,
        statement: &Statement,
        mode: mtc_core::QueryMode,
    ) -> Result<mtc_core::QueryResult, SqlError> {
        if statement.sql == Dialect::Sqlite.list_tables("").sql {
            return Err(SqlError::Connection("catalog unavailable".into()));
        }
        self.0.query(statement, mode).await
    }
}

#[tokio::test]
async fn test_schema_discovery_failure_aborts_pass() {
    let net = Network::new(true);
    let broken: Arc<dyn SqlExecutor> = Arc::new(BrokenCatalog(net.executor()));
    let inputs = RewriteInputs {
        source: net.alpha.clone(),
        dest: tenant(5, "bravo"),
        link_manager_enabled: true,
    };

    let err = ReferenceRewritePass::new(broken, &CloneConfig::default())
        .run(&inputs)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("wp_5_"));
}
