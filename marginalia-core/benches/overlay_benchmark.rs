use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use marginalia_core::{Document, Highlight, HighlightColor, Overlay, Segment};

const VERSE: &str =
    "And the earth was without form, and void; and darkness was upon the face of the deep.";

fn chapter(verses: u32) -> Document {
    let segments = (1..=verses).map(|n| Segment::new(n, VERSE)).collect();
    Document::chapter("bench", segments)
}

fn highlights(doc: &Document, count: usize) -> Vec<Highlight> {
    let len = doc.len();
    (0..count)
        .map(|i| {
            let start = (i * 37) % (len - 50);
            let end = start + 10 + (i * 13) % 40;
            Highlight::new(format!("h{i}"), start, end, HighlightColor::ALL[i % 5])
        })
        .collect()
}

fn bench_overlay_plain(c: &mut Criterion) {
    let doc = chapter(50);
    c.bench_function("overlay_50_verses_no_highlights", |b| {
        b.iter(|| black_box(Overlay::for_document(black_box(&doc)).render()))
    });
}

fn bench_overlay_dense(c: &mut Criterion) {
    let doc = chapter(50);
    let hs = highlights(&doc, 200);
    c.bench_function("overlay_50_verses_200_highlights", |b| {
        b.iter(|| {
            black_box(
                Overlay::for_document(black_box(&doc))
                    .highlights(hs.iter().cloned())
                    .selection(100, 180)
                    .render(),
            )
        })
    });
}

fn bench_touched_verses(c: &mut Criterion) {
    let doc = chapter(150);
    c.bench_function("verses_touched_150", |b| {
        b.iter(|| black_box(doc.touched_by(black_box(500), black_box(4_000))))
    });
}

criterion_group!(
    benches,
    bench_overlay_plain,
    bench_overlay_dense,
    bench_touched_verses
);
criterion_main!(benches);
