// One catalog, three stores: the same request compiles consistently everywhere

use dbquery::{Backend, BackendKind, ErrorKind, QueryOptions, SchemaRegistry, shape_totals};
use sea_orm::DatabaseBackend;
use serde_json::{Value, json};

mod common;
use common::{compile, embedded_registry, relational_registry};

fn registries() -> Vec<SchemaRegistry> {
    vec![
        relational_registry(DatabaseBackend::Postgres, QueryOptions::default()),
        embedded_registry(Backend::document()),
        embedded_registry(Backend::search_index()),
    ]
}

fn document_match(query: &str) -> Value {
    let compiled = compile(&embedded_registry(Backend::document()), query).unwrap();
    let document = compiled.as_document().expect("document backend");
    document
        .pipeline
        .iter()
        .find_map(|stage| stage.get("$match").cloned())
        .unwrap_or_else(|| panic!("{query} has no $match stage"))
}

fn search_body(query: &str) -> Value {
    let compiled = compile(&embedded_registry(Backend::search_index()), query).unwrap();
    compiled.as_search_index().expect("search-index backend").body.clone()
}

#[test]
fn test_backend_kinds() {
    let kinds: Vec<BackendKind> = registries()
        .iter()
        .map(|registry| compile(registry, "").unwrap().kind())
        .collect();
    assert_eq!(
        kinds,
        vec![BackendKind::Relational, BackendKind::Document, BackendKind::SearchIndex]
    );
}

#[test]
fn test_validation_errors_do_not_depend_on_the_store() {
    for registry in registries() {
        for (query, kind, param) in [
            ("colour=red", ErrorKind::UnknownAttribute, "colour"),
            ("brand__name=acme", ErrorKind::InvalidRelationPath, "brand__name"),
            ("price__icontains=1", ErrorKind::UnsupportedOperator, "price__icontains"),
            ("limit=-1", ErrorKind::MalformedParameter, "limit"),
            ("totals=median__price", ErrorKind::MalformedAggregate, "totals"),
        ] {
            let err = compile(&registry, query).unwrap_err();
            assert_eq!(err.kind(), kind, "{query}");
            assert_eq!(err.param(), param, "{query}");
        }
    }
}

#[test]
fn test_relation_filter_in_every_store() {
    let registry = relational_registry(DatabaseBackend::Postgres, QueryOptions::default());
    let sql = compile(&registry, "category__name=Chairs").unwrap().as_relational().unwrap().to_sql();
    assert!(sql.contains(r#""rel_category"."name" = 'Chairs'"#), "{sql}");

    assert_eq!(
        document_match("category__name=Chairs"),
        json!({"category.name": {"$eq": "Chairs"}})
    );
    assert_eq!(
        search_body("category__name=Chairs")["query"],
        json!({"term": {"category.name.raw": "Chairs"}})
    );
}

#[test]
fn test_to_many_filter_in_every_store() {
    let registry = relational_registry(DatabaseBackend::Postgres, QueryOptions::default());
    let sql = compile(&registry, "reviews__rating__gte=4").unwrap().as_relational().unwrap().to_sql();
    assert!(sql.contains(r#""rel_reviews"."rating" >= 4"#), "{sql}");

    assert_eq!(document_match("reviews__rating__gte=4"), json!({"reviews.rating": {"$gte": 4}}));
    assert_eq!(
        search_body("reviews__rating__gte=4")["query"],
        json!({"nested": {"path": "reviews", "query": {"range": {"reviews.rating": {"gte": 4}}}}})
    );
}

#[test]
fn test_pagination_in_every_store() {
    let compiled = compile(&embedded_registry(Backend::document()), "order=-price&limit=2&offset=4").unwrap();
    assert_eq!(
        compiled.as_document().unwrap().pipeline,
        vec![
            json!({"$sort": {"price": -1}}),
            json!({"$skip": 4}),
            json!({"$limit": 2}),
        ]
    );

    let body = search_body("order=-price&limit=2&offset=4");
    assert_eq!(body["from"], 4);
    assert_eq!(body["size"], 2);
    assert_eq!(body["sort"], json!([{"price": {"order": "desc"}}]));
}

#[test]
fn test_totals_layout_matches_across_stores() {
    let query = "totals=count,max__price&group_by=category__name";

    let registry = relational_registry(DatabaseBackend::Postgres, QueryOptions::default());
    let relational = compile(&registry, query).unwrap();
    let relational = relational.as_relational().unwrap().totals.clone().unwrap();

    let document = compile(&embedded_registry(Backend::document()), query).unwrap();
    let document = document.as_document().unwrap().totals.clone().unwrap();

    let search = compile(&embedded_registry(Backend::search_index()), query).unwrap();
    let search = search.as_search_index().unwrap().clone();

    assert_eq!(relational.dimensions, vec!["category__name"]);
    assert_eq!(relational.metrics, vec!["count", "max_price"]);
    assert_eq!(document.dimensions, relational.dimensions);
    assert_eq!(document.metrics, relational.metrics);
    assert_eq!(search.dimensions, relational.dimensions);
    assert_eq!(search.metrics, relational.metrics);
}

#[test]
fn test_search_index_aggregations_shape_like_sql_rows() {
    let compiled = compile(
        &embedded_registry(Backend::search_index()),
        "totals=count,max__price&group_by=category__name",
    )
    .unwrap();
    let query = compiled.as_search_index().unwrap();

    let rows = query.totals_rows(&json!({
        "category__name": {"buckets": [
            {"key": "Chairs", "doc_count": 2, "max_price": {"value": 120.0}},
            {"key": "Tables", "doc_count": 1, "max_price": {"value": 450.0}}
        ]}
    }));
    let totals = shape_totals(&query.dimensions, &query.metrics, &rows);

    assert_eq!(
        Value::Object(totals),
        json!({
            "total_count": {"Chairs": 2, "Tables": 1},
            "total_max_price": {"Chairs": 120.0, "Tables": 450.0}
        })
    );
}

#[test]
fn test_fulltext_in_every_store() {
    let registry = relational_registry(DatabaseBackend::Postgres, QueryOptions::default());
    assert!(compile(&registry, "q=oak").unwrap().as_relational().unwrap().to_sql().contains("to_tsvector"));

    assert_eq!(
        document_match("q=oak"),
        json!({"$or": [{"$or": [{"name": {"$regex": "oak", "$options": "i"}}]}]})
    );
    assert_eq!(
        search_body("q=oak")["query"],
        json!({"multi_match": {"query": "oak", "fields": ["name"], "operator": "or"}})
    );
}

#[test]
fn test_group_ordering_matches_across_stores() {
    // Parent groups by value, rows within a parent by metric, ties by value
    let query = "totals=sum__price&group_by=category__name,name";

    let registry = relational_registry(DatabaseBackend::Postgres, QueryOptions::default());
    let compiled = compile(&registry, query).unwrap();
    let sql = compiled.as_relational().unwrap().totals_statement().unwrap().sql;
    assert!(
        sql.ends_with(r#"ORDER BY "totals_category"."name" ASC, SUM("products"."price") DESC, "products"."name" ASC"#),
        "{sql}"
    );

    let document = compile(&embedded_registry(Backend::document()), query).unwrap();
    let pipeline = &document.as_document().unwrap().totals.as_ref().unwrap().pipeline;
    assert!(
        pipeline.contains(&json!({"$sort": {"_id.category__name": 1, "sum_price": -1, "_id.name": 1}})),
        "{pipeline:?}"
    );

    let aggs = &search_body(query)["aggs"]["category__name"];
    assert_eq!(aggs["terms"]["order"], json!([{"_key": "asc"}]));
    assert_eq!(
        aggs["aggs"]["name"]["terms"]["order"],
        json!([{"sum_price": "desc"}, {"_key": "asc"}])
    );
}
