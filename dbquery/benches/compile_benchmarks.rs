/*!
# Compile Benchmarks

Parse, validate and compile throughput for each backend.

## Usage

```bash
# Run all benchmarks
cargo bench --bench compile_benchmarks

# Run one group
cargo bench --bench compile_benchmarks -- "Relational"

# Quick run with fewer samples
cargo bench --bench compile_benchmarks -- --quick
```

HTML reports are generated in `target/criterion/report/index.html`.
*/

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use dbquery::{
    AttributeDef, AttributeKind, Backend, QueryParams, RelationDef, ResourceSchema, SchemaRegistry,
};
use sea_orm::DatabaseBackend;
use std::hint::black_box;

const QUERIES: [(&str, &str); 5] = [
    ("simple", "name=chair&price__gte=10&limit=20"),
    ("relation", "category__name__iexact=furniture&order=-price,name&limit=20&offset=40"),
    (
        "search_tree",
        r#"search={"or":[{"price__lt":10},{"not":{"category__name":"outlet"}},{"name__istartswith":"ch","price__range":[1,50]}]}"#,
    ),
    ("fulltext", "q=red oak chair&total_count=true"),
    ("totals", "totals=count,avg__price&group_by=category__name,name&group_limit=3"),
];

fn registry(backend: &Backend) -> SchemaRegistry {
    let products = ResourceSchema::new("products", "products")
        .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
        .with_attribute(AttributeDef::new("name", AttributeKind::String).keyword("raw"))
        .with_attribute(AttributeDef::new("price", AttributeKind::Numeric))
        .with_relation(match backend {
            Backend::Relational(_) => RelationDef::to_one("category", "categories", "category_id", "id"),
            _ => RelationDef::embedded("category", "categories", false),
        })
        .with_fulltext(&["name"], true);
    let categories = ResourceSchema::new("categories", "categories")
        .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
        .with_attribute(AttributeDef::new("name", AttributeKind::String).keyword("raw"));

    SchemaRegistry::builder()
        .register(products, backend.clone())
        .register(categories, backend.clone())
        .build()
        .expect("benchmark schemas are valid")
}

fn bench_parse(c: &mut Criterion) {
    let registry = registry(&Backend::relational(DatabaseBackend::Postgres));
    let resource = registry.resource("products").expect("registered");
    let mut group = c.benchmark_group("Parse");

    for (name, query) in QUERIES {
        let params = QueryParams::from_query_string(query);
        group.bench_with_input(BenchmarkId::new("parse", name), &params, |b, params| {
            b.iter(|| black_box(resource.parse(params)));
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let backends = [
        ("Relational", Backend::relational(DatabaseBackend::Postgres)),
        ("Document", Backend::document()),
        ("Search Index", Backend::search_index()),
    ];

    for (label, backend) in backends {
        let registry = registry(&backend);
        let resource = registry.resource("products").expect("registered");
        let mut group = c.benchmark_group(label);

        for (name, query) in QUERIES {
            let params = QueryParams::from_query_string(query);
            group.bench_with_input(BenchmarkId::new("compile", name), &params, |b, params| {
                b.iter(|| black_box(resource.compile(params)));
            });
        }
        group.finish();
    }
}

fn configure_criterion() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(std::time::Duration::from_secs(3))
        .warm_up_time(std::time::Duration::from_secs(1))
}

criterion_group! {
    name = benches;
    config = configure_criterion();
    targets = bench_parse, bench_compile
}
criterion_main!(benches);
