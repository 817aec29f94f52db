// gramble-generate: Enumerate the records a grammar symbol generates.
//
// Prints one JSON object per line, shortest records first.
//
// Usage:
//   gramble-generate [-g GRAMMAR] [-s SYMBOL] [-n MAX] [OPTIONS]
//
// Options:
//   -g, --grammar PATH      Grammar file (default: $GRAMBLE_GRAMMAR)
//   -s, --symbol NAME       Start symbol (default: the grammar's default)
//   -n COUNT                Stop after COUNT records
//   --max-recursion N       Times one symbol may be entered along a path
//   --max-chars N           Maximum characters per record
//   -h, --help              Print help

use std::io::{self, Write};

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (common, args) = gramble_cli::parse_args(&args).unwrap_or_else(|e| gramble_cli::fatal(&e));

    if gramble_cli::wants_help(&args) {
        println!("gramble-generate: Enumerate the records a grammar symbol generates.");
        println!();
        println!("Usage: gramble-generate [-g GRAMMAR] [-s SYMBOL] [-n MAX] [OPTIONS]");
        println!();
        println!("Prints one JSON object per line, shortest records first.");
        println!();
        println!("Options:");
        println!("  -g, --grammar PATH      Grammar file (default: $GRAMBLE_GRAMMAR)");
        println!("  -s, --symbol NAME       Start symbol (default: the grammar's default)");
        println!("  -n COUNT                Stop after COUNT records");
        println!("  --max-recursion N       Times one symbol may be entered along a path");
        println!("  --max-chars N           Maximum characters per record");
        println!("  -h, --help              Print this help");
        return;
    }

    let loaded = gramble_cli::load_grammar(common.grammar.as_deref())
        .unwrap_or_else(|e| gramble_cli::fatal(&e));
    let symbol = common.symbol(&loaded).unwrap_or_else(|e| gramble_cli::fatal(&e));
    let mut opts = common.apply(loaded.options.clone());
    if let Some(n) = common.count {
        opts.max_results = Some(n);
    }

    let records = loaded
        .grammar
        .generate(&symbol, &opts)
        .unwrap_or_else(|e| gramble_cli::fatal(&e.to_string()));

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    for record in records {
        let _ = writeln!(out, "{}", gramble_cli::format_record(&record));
    }
}
