//! Behavioral tests for the combinator algebra, driven through `Grammar`.
//!
//! Run: cargo test -p gramble-fsa --test properties

use gramble_fsa::{GenOptions, GrambleError, Grammar, Namespace, Record, State, record};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn lit(tape: &str, text: &str) -> State {
    State::lit(tape, text)
}

/// Every record of `state`, sorted so comparisons ignore traversal order.
fn all_records(state: State) -> Vec<Record> {
    records_with(&Grammar::new(), state, &GenOptions::default())
}

fn records_with(grammar: &Grammar, state: State, opts: &GenOptions) -> Vec<Record> {
    let mut out: Vec<Record> = grammar
        .generate_state(&state, opts)
        .unwrap_or_else(|e| panic!("generation failed: {e}"))
        .collect();
    out.sort();
    out
}

fn symbol_records(grammar: &Grammar, symbol: &str, opts: &GenOptions) -> Vec<Record> {
    let mut out: Vec<Record> = grammar.generate(symbol, opts).unwrap().collect();
    out.sort();
    out
}

fn texts(records: &[Record], tape: &str) -> Vec<String> {
    records.iter().map(|r| r[tape].clone()).collect()
}

// ---------------------------------------------------------------------------
// Literals and concatenation
// ---------------------------------------------------------------------------

#[test]
fn literal_generates_exactly_its_text() {
    for (tape, text) in [("text", "a"), ("text", "hello"), ("gloss", "ÄÖ-ü"), ("t", "aaa")] {
        assert_eq!(all_records(lit(tape, text)), vec![record([(tape, text)])]);
    }
}

#[test]
fn concat_is_order_independent_across_tapes() {
    let ab = all_records(State::seq([lit("t1", "ab"), lit("t2", "xy")]));
    let ba = all_records(State::seq([lit("t2", "xy"), lit("t1", "ab")]));
    let expected = vec![record([("t1", "ab"), ("t2", "xy")])];
    assert_eq!(ab, expected);
    assert_eq!(ba, expected);
}

#[test]
fn concat_on_one_tape_appends() {
    let out = all_records(State::seq([lit("t", "ab"), State::empty(), lit("t", "cd")]));
    assert_eq!(out, vec![record([("t", "abcd")])]);
}

#[test]
fn empty_sequence_is_the_empty_record() {
    assert_eq!(all_records(State::seq(Vec::new())), vec![Record::new()]);
}

// ---------------------------------------------------------------------------
// Union
// ---------------------------------------------------------------------------

#[test]
fn union_generates_both_sides() {
    let a = lit("t", "cat");
    let b = State::seq([lit("t", "dog"), lit("u", "x")]);
    let mut expected = all_records(a.clone());
    expected.extend(all_records(b.clone()));
    expected.sort();
    assert_eq!(all_records(State::uni([a, b])), expected);
}

#[test]
fn union_accepts_if_either_side_does() {
    let out = all_records(State::uni([lit("t", "a"), State::empty()]));
    assert_eq!(out, vec![Record::new(), record([("t", "a")])]);
}

#[test]
fn union_of_nothing_is_empty() {
    assert!(all_records(State::uni(Vec::new())).is_empty());
}

// ---------------------------------------------------------------------------
// Join and semijoin
// ---------------------------------------------------------------------------

#[test]
fn join_on_same_tape_intersects() {
    assert_eq!(
        all_records(State::join(lit("t", "ab"), lit("t", "ab"))),
        vec![record([("t", "ab")])]
    );
    assert!(all_records(State::join(lit("t", "ab"), lit("t", "ac"))).is_empty());
}

#[test]
fn join_on_different_tapes_combines() {
    assert_eq!(
        all_records(State::join(lit("t1", "ab"), lit("t2", "xy"))),
        vec![record([("t1", "ab"), ("t2", "xy")])]
    );
}

#[test]
fn join_shares_only_common_tapes() {
    let lexicon = State::uni([
        State::seq([lit("text", "cat"), lit("gloss", "CAT")]),
        State::seq([lit("text", "dog"), lit("gloss", "DOG")]),
    ]);
    let rule = State::seq([lit("text", "dog"), lit("pos", "N")]);
    assert_eq!(
        all_records(State::join(lexicon, rule)),
        vec![record([("gloss", "DOG"), ("pos", "N"), ("text", "dog")])]
    );
}

#[test]
fn join_with_accepting_right_side() {
    let out = all_records(State::join(lit("t", "a"), State::maybe(lit("t", "a"))));
    assert_eq!(out, vec![record([("t", "a")])]);
}

#[test]
fn join_with_nullable_side_on_other_tape() {
    let expected = vec![record([("t1", "a"), ("t2", "x")]), record([("t2", "x")])];
    assert_eq!(
        all_records(State::join(State::maybe(lit("t1", "a")), lit("t2", "x"))),
        expected
    );
    assert_eq!(
        all_records(State::join(lit("t2", "x"), State::maybe(lit("t1", "a")))),
        expected
    );
}

#[test]
fn join_with_unbounded_side_on_other_tape() {
    let out = records_with(
        &Grammar::new(),
        State::join(lit("t1", "a"), State::star(lit("t2", "x"))),
        &GenOptions::default().with_max_chars(3),
    );
    assert_eq!(
        out,
        vec![
            record([("t1", "a")]),
            record([("t1", "a"), ("t2", "x")]),
            record([("t1", "a"), ("t2", "xx")]),
        ]
    );
}

#[test]
fn join_of_disjoint_repetitions_is_a_cross_product() {
    let out = records_with(
        &Grammar::new(),
        State::join(State::star(lit("t1", "a")), State::star(lit("t2", "x"))),
        &GenOptions::default().with_max_chars(2),
    );
    // Every combination up to two characters, each exactly once.
    assert_eq!(
        out,
        vec![
            Record::new(),
            record([("t1", "a")]),
            record([("t1", "a"), ("t2", "x")]),
            record([("t1", "aa")]),
            record([("t2", "x")]),
            record([("t2", "xx")]),
        ]
    );
}

#[test]
fn join_lets_the_wider_side_lead() {
    // The right side covers every tape of the left, so it drives the gloss.
    let filter = State::maybe(lit("text", "dog"));
    let out = all_records(State::join(filter, lexicon()));
    assert_eq!(out, vec![record([("gloss", "DOG"), ("text", "dog")])]);
}

fn lexicon() -> State {
    State::uni([
        State::seq([lit("text", "cat"), lit("gloss", "CAT")]),
        State::seq([lit("text", "dog"), lit("gloss", "DOG")]),
    ])
}

#[test]
fn semijoin_keeps_consistent_runs() {
    let out = all_records(State::semijoin(lexicon(), lit("gloss", "DOG")));
    assert_eq!(out, vec![record([("gloss", "DOG"), ("text", "dog")])]);
}

#[test]
fn semijoin_with_no_consistent_run_is_empty() {
    assert!(all_records(State::semijoin(lexicon(), lit("gloss", "COW"))).is_empty());
    assert!(all_records(State::semijoin(lexicon(), lit("gloss", "DO"))).is_empty());
}

#[test]
fn semijoin_on_unknown_tape_is_empty() {
    assert!(all_records(State::semijoin(lexicon(), lit("other", "x"))).is_empty());
}

#[test]
fn semijoin_needs_every_filter_tape() {
    let filter = State::seq([lit("text", "cat"), lit("gloss", "CAT")]);
    assert_eq!(all_records(State::semijoin(lexicon(), filter)).len(), 1);
    let mismatched = State::seq([lit("text", "cat"), lit("gloss", "DOG")]);
    assert!(all_records(State::semijoin(lexicon(), mismatched)).is_empty());
}

// ---------------------------------------------------------------------------
// Negation
// ---------------------------------------------------------------------------

fn negation_grammar() -> Grammar {
    let mut g = Grammar::new();
    g.define("N", State::not(lit("t", "a"))).unwrap();
    g.define("vocab", lit("t", "b")).unwrap();
    g
}

#[test]
fn negation_accepts_other_strings() {
    let g = negation_grammar();
    let opts = GenOptions::default();
    let parsed: Vec<Record> = g.parse("N", &record([("t", "b")]), &opts).unwrap().collect();
    assert_eq!(parsed, vec![record([("t", "b")])]);
    let parsed: Vec<Record> = g.parse("N", &record([("t", "ab")]), &opts).unwrap().collect();
    assert_eq!(parsed, vec![record([("t", "ab")])]);
}

#[test]
fn negation_rejects_its_child() {
    let g = negation_grammar();
    let parsed: Vec<Record> = g
        .parse("N", &record([("t", "a")]), &GenOptions::default())
        .unwrap()
        .collect();
    assert!(parsed.is_empty());
}

#[test]
fn negation_generates_complement_up_to_bound() {
    let g = negation_grammar();
    let out = symbol_records(&g, "N", &GenOptions::default().with_max_chars(1));
    assert_eq!(out, vec![Record::new(), record([("t", "b")])]);
}

#[test]
fn double_negation_restores_language() {
    let g = negation_grammar();
    let state = State::not(State::not(lit("t", "a")));
    let out = records_with(&g, state, &GenOptions::default().with_max_chars(3));
    assert_eq!(out, vec![record([("t", "a")])]);
}

#[test]
fn negation_over_two_tapes_is_unsupported() {
    let mut g = Grammar::new();
    g.define("bad", State::not(State::seq([lit("t", "a"), lit("u", "b")])))
        .unwrap();
    let err = g.generate("bad", &GenOptions::default()).err().unwrap();
    assert!(matches!(err, GrambleError::UnsupportedNegation(_)));
}

// ---------------------------------------------------------------------------
// Repetition
// ---------------------------------------------------------------------------

#[test]
fn bounded_repetition() {
    let rep = State::rep(lit("t", "a"), 2, Some(3)).unwrap();
    assert_eq!(
        all_records(rep),
        vec![record([("t", "aa")]), record([("t", "aaa")])]
    );
}

#[test]
fn repetition_of_multichar_literal() {
    let rep = State::rep(lit("t", "ab"), 0, Some(2)).unwrap();
    assert_eq!(
        all_records(rep),
        vec![Record::new(), record([("t", "ab")]), record([("t", "abab")])]
    );
}

#[test]
fn plus_and_maybe() {
    let opts = GenOptions::default().with_max_chars(3);
    let plus = records_with(&Grammar::new(), State::plus(lit("t", "a")), &opts);
    assert_eq!(texts(&plus, "t"), vec!["a", "aa", "aaa"]);
    assert_eq!(
        all_records(State::maybe(lit("t", "a"))),
        vec![Record::new(), record([("t", "a")])]
    );
}

#[test]
fn inverted_bounds_are_rejected() {
    let err = State::rep(lit("t", "a"), 3, Some(1)).unwrap_err();
    assert!(matches!(err, GrambleError::InvalidRepetition { min: 3, max: 1 }));
}

// ---------------------------------------------------------------------------
// Embedding and recursion
// ---------------------------------------------------------------------------

fn recursive_grammar() -> Grammar {
    let mut g = Grammar::new();
    g.define(
        "X",
        State::seq([lit("t", "a"), State::uni([State::embed("X", &[]), State::empty()])]),
    )
    .unwrap();
    g
}

#[test]
fn recursion_is_bounded() {
    let g = recursive_grammar();
    for k in 1..=4 {
        let out = symbol_records(&g, "X", &GenOptions::default().with_max_recursion(k));
        let expected: Vec<Record> = (1..=k)
            .map(|n| record([("t", "a".repeat(n).as_str())]))
            .collect();
        assert_eq!(out, expected, "max_recursion {k}");
    }
}

#[test]
fn recursion_without_base_case_generates_nothing() {
    // Every path ends in a blocked embed, which neither moves nor accepts.
    let mut g = Grammar::new();
    g.define("X", State::seq([lit("t", "a"), State::embed("X", &[])]))
        .unwrap();
    for k in 0..=4 {
        let out = symbol_records(&g, "X", &GenOptions::default().with_max_recursion(k));
        assert!(out.is_empty(), "max_recursion {k}: {out:?}");
    }
}

#[test]
fn zero_recursion_generates_nothing() {
    let g = recursive_grammar();
    let out = symbol_records(&g, "X", &GenOptions::default().with_max_recursion(0));
    assert!(out.is_empty());
}

#[test]
fn unresolved_symbol_is_empty() {
    let mut g = Grammar::new();
    g.define("X", State::seq([lit("t", "a"), State::embed("missing", &[])]))
        .unwrap();
    assert_eq!(
        symbol_records(&g, "X", &GenOptions::default()),
        vec![record([("t", "a")])]
    );
}

#[test]
fn embeds_resolve_through_namespaces() {
    let mut verbs = Namespace::new();
    verbs.add_symbol("stem", lit("text", "run")).unwrap();
    verbs
        .add_symbol(
            "all",
            State::seq([
                State::embed("stem", &["Verbs".to_string()]),
                State::maybe(lit("text", "s")),
            ]),
        )
        .unwrap();
    verbs.set_default_symbol("all");

    let mut root = Namespace::new();
    root.add_child("Verbs", verbs);
    root.add_symbol(
        "word",
        State::uni([State::embed("Verbs", &[]), State::embed("Verbs.stem", &[])]),
    )
    .unwrap();

    let g = Grammar::from_namespace(root);
    let out = symbol_records(&g, "word", &GenOptions::default());
    assert_eq!(texts(&out, "text"), vec!["run", "runs"]);
    assert_eq!(g.symbols(), vec!["Verbs.all", "Verbs.stem", "word"]);
}

#[test]
fn embedded_symbols_contribute_their_tapes() {
    let mut g = Grammar::new();
    g.define("noun", State::seq([lit("text", "cat"), lit("gloss", "CAT")]))
        .unwrap();
    g.define("word", State::seq([State::embed("noun", &[]), lit("text", "s")]))
        .unwrap();
    let restricted = State::semijoin(State::embed("word", &[]), lit("gloss", "CAT"));
    let out = records_with(&g, restricted, &GenOptions::default());
    assert_eq!(out, vec![record([("gloss", "CAT"), ("text", "cats")])]);
}

// ---------------------------------------------------------------------------
// Projection, drop and rename
// ---------------------------------------------------------------------------

#[test]
fn projection_hides_other_tapes() {
    let both = State::seq([lit("text", "cat"), lit("gloss", "CAT")]);
    assert_eq!(
        all_records(State::proj(both.clone(), ["text"])),
        vec![record([("text", "cat")])]
    );
    assert_eq!(
        all_records(State::drop(both, "text")),
        vec![record([("gloss", "CAT")])]
    );
}

#[test]
fn hidden_tapes_do_not_constrain_joins() {
    let left = State::proj(State::seq([lit("text", "cat"), lit("gloss", "CAT")]), ["text"]);
    let right = State::seq([lit("text", "cat"), lit("gloss", "FELINE")]);
    assert_eq!(
        all_records(State::join(left, right)),
        vec![record([("gloss", "FELINE"), ("text", "cat")])]
    );
}

#[test]
fn rename_moves_output() {
    assert_eq!(
        all_records(State::rename(lit("text", "ab"), "text", "surface")),
        vec![record([("surface", "ab")])]
    );
}

#[test]
fn rename_swaps_names() {
    let both = State::seq([lit("text", "a"), lit("surface", "b")]);
    assert_eq!(
        all_records(State::rename(both, "text", "surface")),
        vec![record([("surface", "a"), ("text", "b")])]
    );
}

#[test]
fn renamed_grammars_join_on_the_new_name() {
    let renamed = State::rename(lit("text", "cat"), "text", "lemma");
    let entry = State::seq([lit("lemma", "cat"), lit("gloss", "CAT")]);
    assert_eq!(
        all_records(State::join(renamed, entry)),
        vec![record([("gloss", "CAT"), ("lemma", "cat")])]
    );
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

fn animals() -> State {
    State::uni([lit("t", "cat"), lit("t", "dog"), lit("t", "cow")])
}

#[test]
fn starts_with_filter() {
    let out = all_records(State::join(animals(), State::starts_with("t", lit("t", "c"))));
    assert_eq!(texts(&out, "t"), vec!["cat", "cow"]);
}

#[test]
fn ends_with_filter() {
    let out = all_records(State::join(animals(), State::ends_with("t", lit("t", "g"))));
    assert_eq!(texts(&out, "t"), vec!["dog"]);
}

#[test]
fn contains_filter() {
    let out = all_records(State::join(animals(), State::contains("t", lit("t", "o"))));
    assert_eq!(texts(&out, "t"), vec!["cow", "dog"]);
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

fn compile_grammar() -> Grammar {
    let mut g = Grammar::new();
    g.define("stem", State::uni([lit("text", "walk"), lit("text", "talk")]))
        .unwrap();
    g.define(
        "word",
        State::seq([
            State::embed("stem", &[]),
            State::uni([
                State::seq([lit("text", "ed"), lit("gloss", "PAST")]),
                State::seq([lit("text", "s"), lit("gloss", "3SG")]),
                State::empty(),
            ]),
        ]),
    )
    .unwrap();
    g.define(
        "loop",
        State::seq([lit("t", "ab"), State::uni([State::embed("loop", &[]), State::empty()])]),
    )
    .unwrap();
    g
}

#[test]
fn compilation_preserves_results() {
    let g = compile_grammar();
    for symbol in ["word", "loop"] {
        for level in [1, 3, 10] {
            let opts = GenOptions::default().with_max_recursion(3);
            let lazy = symbol_records(&g, symbol, &opts);
            let compiled = g.compile(symbol, level, 3).unwrap();
            assert!(compiled.is_compiled());
            let eager = records_with(&g, compiled, &opts);
            assert_eq!(lazy, eager, "{symbol} at level {level}");
        }
    }
}

#[test]
fn compilation_preserves_truncated_results() {
    let g = compile_grammar();
    let opts = GenOptions::default().with_max_recursion(3).with_max_results(3);
    let lazy: Vec<Record> = g.generate("word", &opts).unwrap().collect();
    let compiled = g.compile("word", 4, 3).unwrap();
    let eager: Vec<Record> = g.generate_state(&compiled, &opts).unwrap().collect();
    assert_eq!(lazy.len(), 3);
    assert_eq!(lazy, eager);
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

#[test]
fn sampling_is_reproducible_with_a_seed() {
    let g = compile_grammar();
    let opts = GenOptions::default().with_seed(42);
    let first = g.sample("word", 8, None, &opts).unwrap();
    let second = g.sample("word", 8, None, &opts).unwrap();
    assert_eq!(first.len(), 8);
    assert_eq!(first, second);
    let all = symbol_records(&g, "word", &GenOptions::default());
    assert!(first.iter().all(|r| all.contains(r)));
}

#[test]
fn sampling_an_empty_language_gives_up() {
    let mut g = Grammar::new();
    g.define("none", State::join(lit("t", "a"), lit("t", "b")))
        .unwrap();
    let mut opts = GenOptions::default().with_seed(1);
    opts.max_tries = 20;
    assert!(g.sample("none", 3, None, &opts).unwrap().is_empty());
}

#[test]
fn unit_tests_through_the_grammar() {
    let g = compile_grammar();
    let pass = State::record(&record([("text", "walked"), ("gloss", "PAST")]));
    let fail = State::record(&record([("text", "walked"), ("gloss", "3SG")]));
    assert!(g.run_unit_test("word", &pass).unwrap());
    assert!(!g.run_unit_test("word", &fail).unwrap());
}
