#![allow(dead_code)]

use dbquery::{
    AttributeDef, AttributeKind, Backend, CompiledQuery, QueryError, QueryOptions, QueryParams, RelationDef,
    ResourceSchema, SchemaRegistry,
};
use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr};
use serde_json::Value;

// Helper function to get database URL from environment or default to SQLite
fn get_test_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string())
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Catalog schemas: products belong to a category and have many reviews.
///
/// Relational stores link them by key; document and search-index stores keep
/// both relations embedded in the product.
pub fn products_schema(embedded: bool) -> ResourceSchema {
    let (category, reviews) = if embedded {
        (
            RelationDef::embedded("category", "categories", false),
            RelationDef::embedded("reviews", "reviews", true),
        )
    } else {
        (
            RelationDef::to_one("category", "categories", "category_id", "id"),
            RelationDef::to_many("reviews", "reviews", "id", "product_id"),
        )
    };
    ResourceSchema::new("products", "products")
        .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
        .with_attribute(AttributeDef::new("name", AttributeKind::String).keyword("raw"))
        .with_attribute(AttributeDef::new("price", AttributeKind::Numeric))
        .with_attribute(AttributeDef::new("category_id", AttributeKind::Numeric))
        .with_attribute(AttributeDef::new("created", AttributeKind::DateTime).column("created_at"))
        .with_relation(category)
        .with_relation(reviews)
        .with_fulltext(&["name"], false)
}

pub fn categories_schema() -> ResourceSchema {
    ResourceSchema::new("categories", "categories")
        .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
        .with_attribute(AttributeDef::new("name", AttributeKind::String).keyword("raw"))
        .with_relation(RelationDef::to_one("parent", "categories", "parent_id", "id"))
}

pub fn reviews_schema() -> ResourceSchema {
    ResourceSchema::new("reviews", "reviews")
        .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
        .with_attribute(AttributeDef::new("rating", AttributeKind::Numeric))
        .with_attribute(AttributeDef::new("author", AttributeKind::String).keyword("raw"))
}

pub fn relational_registry(backend: DatabaseBackend, options: QueryOptions) -> SchemaRegistry {
    let backend = Backend::relational(backend);
    SchemaRegistry::builder()
        .options(options)
        .register(products_schema(false), backend.clone())
        .register(categories_schema(), backend.clone())
        .register(reviews_schema(), backend)
        .build()
        .expect("catalog schemas are valid")
}

/// Document or search-index registry; embedded categories have no parent
pub fn embedded_registry(backend: Backend) -> SchemaRegistry {
    let categories = ResourceSchema::new("categories", "categories")
        .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
        .with_attribute(AttributeDef::new("name", AttributeKind::String).keyword("raw"));
    SchemaRegistry::builder()
        .register(products_schema(true), backend.clone())
        .register(categories, backend.clone())
        .register(reviews_schema(), backend)
        .build()
        .expect("catalog schemas are valid")
}

/// Parse, validate and compile `query` against the products resource
pub fn compile(registry: &SchemaRegistry, query: &str) -> Result<CompiledQuery, QueryError> {
    registry
        .resource("products")
        .expect("products is registered")
        .compile(&QueryParams::from_query_string(query))
}

pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(get_test_database_url()).await?;

    for statement in [
        "DROP TABLE IF EXISTS reviews",
        "DROP TABLE IF EXISTS products",
        "DROP TABLE IF EXISTS categories",
        "CREATE TABLE categories (id INTEGER PRIMARY KEY, name TEXT NOT NULL, parent_id INTEGER)",
        "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT NOT NULL, price REAL NOT NULL, \
         category_id INTEGER, created_at TEXT NOT NULL)",
        "CREATE TABLE reviews (id INTEGER PRIMARY KEY, product_id INTEGER NOT NULL, rating INTEGER NOT NULL, \
         author TEXT NOT NULL)",
        "INSERT INTO categories (id, name, parent_id) VALUES \
         (1, 'Furniture', NULL), (2, 'Chairs', 1), (3, 'Tables', 1), (4, 'Outlet', NULL)",
        "INSERT INTO products (id, name, price, category_id, created_at) VALUES \
         (1, 'Oak Chair', 120.0, 2, '2023-05-01 10:00:00'), \
         (2, 'Pine Chair', 80.0, 2, '2024-02-11 09:30:00'), \
         (3, 'Oak Table', 450.0, 3, '2024-07-19 12:00:00'), \
         (4, 'Folding Chair', 25.5, 4, '2022-11-30 08:00:00'), \
         (5, 'Lamp', 40.0, NULL, '2024-01-05 18:45:00')",
        "INSERT INTO reviews (id, product_id, rating, author) VALUES \
         (1, 1, 5, 'ann'), (2, 1, 4, 'bob'), (3, 2, 2, 'ann'), (4, 3, 5, 'cid')",
    ] {
        db.execute_unprepared(statement).await?;
    }
    Ok(db)
}

/// `id` of every row, in order
pub fn ids(rows: &[Value]) -> Vec<i64> {
    rows.iter().filter_map(|row| row["id"].as_i64()).collect()
}
