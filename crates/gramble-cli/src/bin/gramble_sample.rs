// gramble-sample: Draw random records from a grammar symbol.
//
// Prints up to COUNT records as JSON, one per line. Fewer are printed if
// the sampler runs out of tries. TAPE=TEXT arguments restrict the samples
// to records consistent with them.
//
// Usage:
//   gramble-sample [-g GRAMMAR] [-s SYMBOL] [-n COUNT] [--seed N] [TAPE=TEXT...]
//
// Options:
//   -g, --grammar PATH      Grammar file (default: $GRAMBLE_GRAMMAR)
//   -s, --symbol NAME       Start symbol (default: the grammar's default)
//   -n COUNT                Number of samples (default: 10)
//   --seed N                Random seed for reproducible output
//   --max-recursion N       Times one symbol may be entered along a path
//   --max-chars N           Maximum characters per record
//   -h, --help              Print help

use std::io::{self, Write};

/// Samples drawn when `-n` is not given.
const DEFAULT_COUNT: usize = 10;

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (common, args) = gramble_cli::parse_args(&args).unwrap_or_else(|e| gramble_cli::fatal(&e));

    if gramble_cli::wants_help(&args) {
        println!("gramble-sample: Draw random records from a grammar symbol.");
        println!();
        println!("Usage: gramble-sample [-g GRAMMAR] [-s SYMBOL] [-n COUNT] [--seed N] [TAPE=TEXT...]");
        println!();
        println!("Options:");
        println!("  -g, --grammar PATH      Grammar file (default: $GRAMBLE_GRAMMAR)");
        println!("  -s, --symbol NAME       Start symbol (default: the grammar's default)");
        println!("  -n COUNT                Number of samples (default: {DEFAULT_COUNT})");
        println!("  --seed N                Random seed for reproducible output");
        println!("  --max-recursion N       Times one symbol may be entered along a path");
        println!("  --max-chars N           Maximum characters per record");
        println!("  -h, --help              Print this help");
        return;
    }

    let loaded = gramble_cli::load_grammar(common.grammar.as_deref())
        .unwrap_or_else(|e| gramble_cli::fatal(&e));
    let symbol = common.symbol(&loaded).unwrap_or_else(|e| gramble_cli::fatal(&e));
    let opts = common.apply(loaded.options.clone());
    let restriction = gramble_cli::parse_assignments(&args).unwrap_or_else(|e| gramble_cli::fatal(&e));
    let restriction = (!restriction.is_empty()).then_some(&restriction);

    let samples = loaded
        .grammar
        .sample(&symbol, common.count.unwrap_or(DEFAULT_COUNT), restriction, &opts)
        .unwrap_or_else(|e| gramble_cli::fatal(&e.to_string()));

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    for record in &samples {
        let _ = writeln!(out, "{}", gramble_cli::format_record(record));
    }
}
