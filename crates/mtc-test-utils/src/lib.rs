//! Testing utilities for MTC workspace
//!
//! SQLite network fixtures shaped like a small multisite install, tenant
//! contexts, upload trees and recording collaborators.

#![allow(missing_docs)]

use async_trait::async_trait;
use indexmap::IndexMap;
use mtc_core::{
    AssetDescriptor, AssetManifest, AssetRef, AssetRegistrar, CollaboratorError, OptionStore,
    SqlExecutor, SqlValue, Statement, TenantContext, TenantId, TenantProvisioner,
};
use mtc_serial::{ArrayKey, ObjectBody, Scalar, SerializedValue};
use mtc_sqlite::SqliteExecutor;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const NETWORK_URL: &str = "https://net.test";

/// Primary tenant: bare `wp_` prefix, network root URL
pub fn primary() -> TenantContext {
    TenantContext::new(TenantId(1), "wp_")
        .with_base_url(NETWORK_URL)
        .with_upload_url(format!("{NETWORK_URL}/wp-content/uploads"))
}

/// Sub-domain tenant `wp_{id}_` at `https://{slug}.net.test`
pub fn tenant(id: u64, slug: &str) -> TenantContext {
    let base = format!("https://{slug}.net.test");
    TenantContext::new(TenantId(id), format!("wp_{id}_"))
        .with_upload_url(format!("{base}/wp-content/uploads/sites/{id}"))
        .with_base_url(base)
}

/// Core tables of one tenant
pub fn create_schema(db: &SqliteExecutor, prefix: &str) {
    let sql = format!(
        "CREATE TABLE {p}options (
            option_id INTEGER PRIMARY KEY AUTOINCREMENT,
            option_name TEXT NOT NULL DEFAULT '',
            option_value TEXT NOT NULL DEFAULT '',
            autoload TEXT NOT NULL DEFAULT 'yes'
        );
        CREATE UNIQUE INDEX {p}options_option_name ON {p}options (option_name);
        CREATE TABLE {p}posts (
            ID INTEGER PRIMARY KEY,
            post_title TEXT NOT NULL DEFAULT '',
            post_content TEXT NOT NULL DEFAULT '',
            post_type TEXT NOT NULL DEFAULT 'post',
            guid TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX {p}posts_type ON {p}posts (post_type, ID);
        CREATE TABLE {p}postmeta (
            meta_id INTEGER PRIMARY KEY,
            post_id INTEGER NOT NULL,
            meta_key TEXT,
            meta_value TEXT
        );
        CREATE INDEX {p}postmeta_post_id ON {p}postmeta (post_id);
        CREATE TABLE {p}terms (term_id INTEGER PRIMARY KEY, name TEXT, slug TEXT);
        CREATE TABLE {p}termmeta (meta_id INTEGER PRIMARY KEY, term_id INTEGER, meta_key TEXT, meta_value TEXT);
        CREATE TABLE {p}term_taxonomy (
            term_taxonomy_id INTEGER PRIMARY KEY,
            term_id INTEGER,
            taxonomy TEXT,
            description TEXT
        );
        CREATE TABLE {p}term_relationships (
            object_id INTEGER,
            term_taxonomy_id INTEGER,
            PRIMARY KEY (object_id, term_taxonomy_id)
        );
        CREATE TABLE {p}comments (
            comment_ID INTEGER PRIMARY KEY,
            comment_post_ID INTEGER,
            comment_author_url TEXT,
            comment_content TEXT
        );
        CREATE TABLE {p}commentmeta (meta_id INTEGER PRIMARY KEY, comment_id INTEGER, meta_key TEXT, meta_value TEXT);
        CREATE TABLE {p}links (
            link_id INTEGER PRIMARY KEY,
            link_url TEXT,
            link_name TEXT,
            link_image TEXT,
            link_notes TEXT
        );",
        p = prefix
    );
    db.execute_batch(&sql).unwrap();
}

/// Network-wide tables that share the primary prefix
pub fn create_network_tables(db: &SqliteExecutor) {
    db.execute_batch(
        "CREATE TABLE wp_users (ID INTEGER PRIMARY KEY, user_login TEXT, user_url TEXT);
         CREATE TABLE wp_blogs (blog_id INTEGER PRIMARY KEY, domain TEXT, path TEXT);
         INSERT INTO wp_users VALUES (1, 'admin', 'https://net.test');
         INSERT INTO wp_blogs VALUES (1, 'net.test', '/');",
    )
    .unwrap();
}

/// Theme settings with the logo URL nested two levels down
pub fn theme_mods(t: &TenantContext) -> String {
    SerializedValue::array(vec![
        (ArrayKey::Int(0), SerializedValue::Scalar(Scalar::Bool(false))),
        (
            ArrayKey::Str("header".into()),
            SerializedValue::array(vec![(
                ArrayKey::Str("logo".into()),
                SerializedValue::string(format!("{}/2024/05/shop-logo.png", t.upload_url)),
            )]),
        ),
        (ArrayKey::Str("footer_text".into()), SerializedValue::string(format!("Visit {}", t.base_url))),
    ])
    .to_string()
}

/// Widget settings stored serialized twice
pub fn double_encoded_widget(t: &TenantContext) -> String {
    let inner = SerializedValue::Sequence(vec![SerializedValue::Record(ObjectBody::new(
        "stdClass",
        vec![(ArrayKey::Str("url".into()), SerializedValue::string(format!("{}/shop", t.base_url)))],
    ))])
    .to_string();
    SerializedValue::string(inner).to_string()
}

/// Role map whose option name carries the table prefix
pub fn user_roles() -> String {
    SerializedValue::array(vec![(
        ArrayKey::Str("administrator".into()),
        SerializedValue::array(vec![(ArrayKey::Str("name".into()), SerializedValue::string("Administrator"))]),
    )])
    .to_string()
}

/// Rows referencing the tenant's URLs and prefix
pub fn seed(db: &SqliteExecutor, t: &TenantContext, link_manager_enabled: bool) {
    let base = &t.base_url;
    let upload = &t.upload_url;
    let p = &t.prefix;
    let q = |s: &str| s.replace('\'', "''");
    let sql = format!(
        "INSERT INTO {p}options (option_name, option_value) VALUES
            ('siteurl', '{base}'),
            ('home', '{base}'),
            ('blogname', 'Tenant {id}'),
            ('admin_email', 'owner{id}@net.test'),
            ('{p}user_roles', '{roles}'),
            ('theme_mods_storefront', '{mods}'),
            ('widget_custom', '{widget}'),
            ('broken_blob', 'a:2:{{i:0;s:{len}:\"{base}\";}}'),
            ('shouty', '{shout}'),
            ('link_manager_enabled', '{links}');
        INSERT INTO {p}posts (ID, post_title, post_content, post_type, guid) VALUES
            (1, 'About', '<a href=\"{base}/about\">About us</a>', 'page', '{base}/?page_id=1'),
            (2, 'Logo', '', 'attachment', '{upload}/2024/05/shop-logo.png'),
            (3, 'Mixed', '<a href=\"{base}/\"><img src=\"{upload}/a.png\"></a>', 'post', '{base}/?p=3');
        INSERT INTO {p}postmeta (meta_id, post_id, meta_key, meta_value) VALUES
            (1, 2, '_wp_attached_file', '2024/05/shop-logo.png'),
            (2, 1, '_thumbnail_url', '{upload}/2024/05/shop-logo.png'),
            (3, 3, '_thumbnail_url', '{upload}/2024/05/shop-logo.png'),
            (4, 1, '_menu_item_url', '{base}/shop');
        INSERT INTO {p}terms VALUES (1, 'Uncategorized', 'uncategorized');
        INSERT INTO {p}term_taxonomy VALUES (1, 1, 'category', 'Posts at {base}');
        INSERT INTO {p}term_relationships VALUES (1, 1);
        INSERT INTO {p}comments VALUES (1, 1, '{base}', 'Great shop at {base}');
        INSERT INTO {p}links VALUES (1, '{base}/blogroll', 'Blogroll', '{upload}/link.png', 'See {base}/notes');",
        id = t.id,
        roles = q(&user_roles()),
        mods = q(&theme_mods(t)),
        widget = q(&double_encoded_widget(t)),
        len = base.len(),
        shout = base.to_uppercase(),
        links = u8::from(link_manager_enabled),
    );
    db.execute_batch(&sql).unwrap();
}

/// Tenant table outside the manifest
pub fn create_plugin_table(db: &SqliteExecutor, t: &TenantContext) {
    db.execute_batch(&format!(
        "CREATE TABLE {p}shop_sessions (session_key TEXT PRIMARY KEY, session_value TEXT);
         INSERT INTO {p}shop_sessions VALUES ('s1', '{v}');",
        p = t.prefix,
        v = SerializedValue::array(vec![(
            ArrayKey::Str("cart_url".into()),
            SerializedValue::string(format!("{}/cart", t.base_url)),
        )])
    ))
    .unwrap();
}

/// In-memory network: primary tenant plus tenant 2 (`alpha`)
pub struct Network {
    pub db: Arc<SqliteExecutor>,
    pub primary: TenantContext,
    pub alpha: TenantContext,
}

impl Network {
    pub fn new(link_manager_enabled: bool) -> Self {
        let db = SqliteExecutor::open_in_memory().unwrap();
        let primary = primary();
        let alpha = tenant(2, "alpha");

        create_network_tables(&db);
        for t in [&primary, &alpha] {
            create_schema(&db, &t.prefix);
            seed(&db, t, link_manager_enabled);
        }
        create_plugin_table(&db, &alpha);

        Self {
            db: Arc::new(db),
            primary,
            alpha,
        }
    }

    pub fn executor(&self) -> Arc<dyn SqlExecutor> {
        Arc::clone(&self.db) as Arc<dyn SqlExecutor>
    }

    pub async fn tables(&self, prefix: &str) -> Vec<String> {
        let stmt = mtc_core::Dialect::Sqlite.list_tables(prefix);
        texts(self.db.query_column(&stmt).await.unwrap())
            .into_iter()
            .filter(|t| t.starts_with(prefix))
            .collect()
    }

    pub async fn count(&self, table: &str) -> i64 {
        let stmt = Statement::new(format!("SELECT COUNT(*) FROM \"{table}\""));
        match self.db.query_scalar(&stmt).await.unwrap() {
            Some(SqlValue::Integer(n)) => n,
            other => panic!("unexpected count {other:?}"),
        }
    }

    /// Values of one column ordered by rowid
    pub async fn column(&self, table: &str, column: &str) -> Vec<String> {
        let stmt = Statement::new(format!("SELECT \"{column}\" FROM \"{table}\" ORDER BY rowid"));
        texts(self.db.query_column(&stmt).await.unwrap())
    }

    /// Single cell selected by a `WHERE` clause
    pub async fn cell(&self, table: &str, column: &str, filter: &str) -> String {
        let stmt = Statement::new(format!("SELECT \"{column}\" FROM \"{table}\" WHERE {filter}"));
        match self.db.query_scalar(&stmt).await.unwrap() {
            Some(SqlValue::Text(s)) => s,
            other => panic!("no text in {table}.{column} where {filter}: {other:?}"),
        }
    }

    pub async fn option(&self, t: &TenantContext, name: &str) -> Option<String> {
        OptionStore::new(self.executor()).get(t, name).await.unwrap()
    }
}

fn texts(values: Vec<SqlValue>) -> Vec<String> {
    values.into_iter().filter_map(SqlValue::into_text).collect()
}

/// Upload tree with matching, resized, unrelated and excluded files
pub fn upload_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for rel in [
        "2024/05/shop-logo.png",
        "2024/05/shop-logo-150x150.png",
        "2024/05/unrelated.png",
        "2023/11/favicon.ico",
        "sites/7/shop-logo.png",
    ] {
        write_file(dir.path(), rel, rel.as_bytes());
    }
    dir
}

pub fn write_file(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

pub fn asset_manifest() -> AssetManifest {
    AssetManifest::new()
        .with_asset("logo", AssetDescriptor::new("shop-logo.png", "image/png"))
        .with_asset("favicon", AssetDescriptor::new("favicon.ico", "image/x-icon"))
}

/// Provisioner over a fixed set of contexts
#[derive(Debug, Default)]
pub struct FixtureProvisioner {
    tenants: IndexMap<TenantId, TenantContext>,
}

impl FixtureProvisioner {
    pub fn new<I: IntoIterator<Item = TenantContext>>(tenants: I) -> Self {
        Self {
            tenants: tenants.into_iter().map(|t| (t.id, t)).collect(),
        }
    }
}

#[async_trait]
impl TenantProvisioner for FixtureProvisioner {
    async fn resolve(&self, tenant: TenantId) -> Result<TenantContext, CollaboratorError> {
        self.tenants
            .get(&tenant)
            .cloned()
            .ok_or_else(|| CollaboratorError::new("provisioner", format!("unknown tenant {tenant}")))
    }
}

/// Registrar that remembers every call
#[derive(Debug, Default)]
pub struct RecordingRegistrar {
    pub calls: Mutex<Vec<(String, PathBuf)>>,
    pub fail: bool,
}

#[async_trait]
impl AssetRegistrar for RecordingRegistrar {
    async fn register(
        &self,
        tenant: &TenantContext,
        key: &str,
        path: &Path,
        _asset: &AssetDescriptor,
    ) -> Result<AssetRef, CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::new("registrar", "media library unavailable"));
        }
        self.calls.lock().push((key.to_string(), path.to_path_buf()));
        Ok(AssetRef(format!("{}:{key}", tenant.id)))
    }
}
