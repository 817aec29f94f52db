// Criterion benchmarks for gramble-fsa.
//
// Builds a small morphological grammar in memory (stems x suffixes with a
// gloss tape, plus a recursive compound rule) and measures generation,
// parsing and compilation.
//
// Run:
//   cargo bench -p gramble-fsa

use criterion::{Criterion, criterion_group, criterion_main};
use gramble_fsa::{GenOptions, Grammar, State, record};

// ---------------------------------------------------------------------------
// Grammar construction
// ---------------------------------------------------------------------------

const STEMS: &[(&str, &str)] = &[
    ("koira", "dog"),
    ("kissa", "cat"),
    ("talo", "house"),
    ("auto", "car"),
    ("metsä", "forest"),
    ("järvi", "lake"),
    ("kukka", "flower"),
    ("lapsi", "child"),
];

const SUFFIXES: &[(&str, &str)] = &[
    ("", ""),
    ("t", "-PL"),
    ("n", "-GEN"),
    ("ssa", "-INE"),
    ("sta", "-ELA"),
    ("lla", "-ADE"),
];

fn entries(pairs: &[(&str, &str)]) -> State {
    State::uni(
        pairs
            .iter()
            .map(|(text, gloss)| State::seq([State::lit("text", text), State::lit("gloss", gloss)])),
    )
}

fn build_grammar() -> Grammar {
    let mut g = Grammar::new();
    g.define("stem", entries(STEMS)).expect("stem");
    g.define("suffix", entries(SUFFIXES)).expect("suffix");
    g.define(
        "word",
        State::seq([State::embed("stem", &[]), State::embed("suffix", &[])]),
    )
    .expect("word");
    g.define(
        "compound",
        State::seq([
            State::embed("stem", &[]),
            State::uni([State::embed("compound", &[]), State::embed("suffix", &[])]),
        ]),
    )
    .expect("compound");
    g
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Enumerate every inflected word (48 records).
fn bench_generate_words(c: &mut Criterion) {
    let g = build_grammar();
    let opts = GenOptions::default();
    c.bench_function("generate_words", |b| {
        b.iter(|| {
            let n = g.generate("word", &opts).expect("generate").count();
            std::hint::black_box(n);
        });
    });
}

/// Enumerate the same words from a compiled root.
fn bench_generate_compiled(c: &mut Criterion) {
    let g = build_grammar();
    let opts = GenOptions::default();
    let compiled = g.compile("word", 6, opts.max_recursion).expect("compile");
    c.bench_function("generate_words_compiled", |b| {
        b.iter(|| {
            let n = g.generate_state(&compiled, &opts).expect("generate").count();
            std::hint::black_box(n);
        });
    });
}

/// First 200 two-stem compounds.
fn bench_generate_compounds(c: &mut Criterion) {
    let g = build_grammar();
    let opts = GenOptions::default().with_max_recursion(2).with_max_results(200);
    c.bench_function("generate_200_compounds", |b| {
        b.iter(|| {
            let n = g.generate("compound", &opts).expect("generate").count();
            std::hint::black_box(n);
        });
    });
}

/// Parse one surface form back to its gloss.
fn bench_parse(c: &mut Criterion) {
    let g = build_grammar();
    let opts = GenOptions::default();
    let input = record([("text", "metsässä")]);
    c.bench_function("parse_one_word", |b| {
        b.iter(|| {
            let out: Vec<_> = g.parse("word", &input, &opts).expect("parse").collect();
            std::hint::black_box(out);
        });
    });
}

/// Draw 100 random samples.
fn bench_sample(c: &mut Criterion) {
    let g = build_grammar();
    let opts = GenOptions::default().with_seed(7);
    c.bench_function("sample_100_words", |b| {
        b.iter(|| {
            let out = g.sample("word", 100, None, &opts).expect("sample");
            std::hint::black_box(out);
        });
    });
}

criterion_group!(
    benches,
    bench_generate_words,
    bench_generate_compiled,
    bench_generate_compounds,
    bench_parse,
    bench_sample,
);
criterion_main!(benches);
