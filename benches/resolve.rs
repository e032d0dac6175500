use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use portal_open_rs::link::LinkOptions;
use portal_open_rs::{
    Dataset, Portal, PortalOptions, VariantQuery, build_final_url, resolve_item,
};
use serde_json::json;

const ORIGIN: &str = "https://portal.test/open.html";

fn sequence_dataset(len: usize) -> Dataset {
    let items = (0..len)
        .map(|i| {
            json!({
                "quizId": format!("q{i}"),
                "title": format!("Quiz {i}"),
                "url": "https://x.test/q?id={id}",
                "variants": [{ "variant": "s1" }, { "variant": "s2", "param": "mode=fast" }],
            })
        })
        .collect::<Vec<_>>();
    Dataset::from_value(json!(items)).expect("sequence dataset")
}

fn bench_item_lookup(c: &mut Criterion) {
    for &len in &[16usize, 256, 4096] {
        let dataset = sequence_dataset(len);
        let last = format!("q{}", len - 1);
        c.bench_with_input(BenchmarkId::new("resolve_item::scan", len), &last, |b, id| {
            b.iter(|| black_box(resolve_item(id, Some(&dataset))));
        });
    }
}

fn bench_build_url(c: &mut Criterion) {
    let dataset = sequence_dataset(1);
    let item = resolve_item("q0", Some(&dataset));
    let options = LinkOptions::new(ORIGIN);
    c.bench_function("build_final_url::plain", |b| {
        b.iter(|| black_box(build_final_url(&item, &VariantQuery::default(), options)));
    });
    let variant = VariantQuery::new("s1");
    c.bench_function("build_final_url::variant", |b| {
        b.iter(|| black_box(build_final_url(&item, &variant, options)));
    });
}

fn bench_render(c: &mut Criterion) {
    let portal = Portal::builder()
        .options(PortalOptions {
            origin: ORIGIN.to_string(),
            ambient_fallback: false,
            ..PortalOptions::default()
        })
        .dataset(sequence_dataset(256))
        .build();
    c.bench_function("portal::render_auto", |b| {
        b.iter(|| {
            let mut page = portal.new_page();
            let outcome = portal.render(&mut page, "id=q128&variant=s2&auto=1");
            black_box((outcome, page));
        });
    });
}

criterion_group!(benches, bench_item_lookup, bench_build_url, bench_render);
criterion_main!(benches);
