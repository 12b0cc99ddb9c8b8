use clinic_quota_hub::bench_support::{
    clinic_quota_service::{IdentifierKind, PlanLimits},
    clinic_sequence_id::generate_next_id_in_year,
    QuotaBenchFixture,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const PATTERNS: &[(&str, &str)] = &[
    ("padded", "INV-0000"),
    ("year_and_padding", "HH/000/year"),
    ("append", "PREFIX"),
    ("year_zeros", "year/00000"),
];

fn bench_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate_next_id");
    for (name, pattern) in PATTERNS {
        group.bench_with_input(BenchmarkId::new("pattern", name), pattern, |b, pattern| {
            let mut sequence = 0u64;
            b.iter(|| {
                sequence += 1;
                black_box(generate_next_id_in_year(
                    Some(*black_box(pattern)),
                    sequence,
                    2000,
                ))
            });
        });
    }
    group.finish();
}

fn bench_allocate(c: &mut Criterion) {
    let fixture = QuotaBenchFixture::new(
        "bench-ids",
        PlanLimits {
            max_users: 1,
            max_clients: 1,
            max_storage_gb: 1.0,
        },
    );
    fixture
        .identifiers
        .set_pattern(&fixture.tenant_id, IdentifierKind::Invoice, "INV-year-000000")
        .expect("pattern stored");

    c.bench_function("allocate_invoice_number", |b| {
        b.iter(|| {
            black_box(
                fixture
                    .identifiers
                    .allocate(&fixture.tenant_id, IdentifierKind::Invoice)
                    .expect("identifier"),
            )
        });
    });
}

criterion_group!(benches, bench_format, bench_allocate);
criterion_main!(benches);
