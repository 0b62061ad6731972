use criterion::{Criterion, black_box, criterion_group, criterion_main};

use sitelock::navigation::ResponseHeaders;
use sitelock::origin::{Origin, OriginPattern};
use sitelock::security::{IsolatedOriginSource, SecurityPolicy};
use sitelock::{IsolationConfig, IsolationContext, IsolationEngine, ProfileId};

fn patterns(count: usize) -> Vec<OriginPattern> {
    (0..count)
        .map(|i| {
            let entry = if i % 4 == 0 {
                format!("https://[*.]wild{}.com", i)
            } else {
                format!("https://isolated{}.com", i)
            };
            OriginPattern::parse(&entry).unwrap()
        })
        .collect()
}

/// Registry lookups against a long pattern list
fn benchmark_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    let policy = SecurityPolicy::new();
    policy
        .add_isolated_origins(patterns(1000), IsolatedOriginSource::CommandLine, None)
        .unwrap();
    let context = IsolationContext::new(policy.allocate_group_id(), ProfileId(1));
    let hit = Origin::parse("https://a.wild400.com").unwrap();
    let miss = Origin::parse("https://nowhere.org").unwrap();

    group.bench_function("is_isolated_hit", |b| {
        b.iter(|| black_box(policy.is_isolated(black_box(&hit), &context)))
    });
    group.bench_function("is_isolated_miss", |b| {
        b.iter(|| black_box(policy.is_isolated(black_box(&miss), &context)))
    });
    group.finish();
}

/// Lock resolution through the engine
fn benchmark_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    let engine = IsolationEngine::new(IsolationConfig::default()).unwrap();
    engine
        .add_isolated_origins(["https://isolated.com", "https://[*.]wild.com"], IsolatedOriginSource::CommandLine, None)
        .unwrap();
    let context = engine.create_browsing_group(ProfileId(1));
    let opt_in = ResponseHeaders::new().with_origin_agent_cluster(true);

    group.bench_function("provisional", |b| {
        b.iter(|| black_box(engine.site_info_for(black_box("https://a.wild.com/page"), &context)))
    });
    group.bench_function("pinned_with_headers", |b| {
        b.iter(|| black_box(engine.resolve_isolation(black_box("https://opt-in.com"), Some(&opt_in), &context)))
    });
    group.finish();
}

criterion_group!(benches, benchmark_registry, benchmark_resolve);
criterion_main!(benches);
