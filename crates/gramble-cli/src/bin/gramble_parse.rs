// gramble-parse: Find the records of a grammar symbol that match given inputs.
//
// Inputs are TAPE=TEXT arguments. Without arguments, reads one JSON object
// per line from stdin and parses each in turn. Matching records are printed
// as JSON, one per line; an input with no match prints "(no parse)".
//
// Usage:
//   gramble-parse [-g GRAMMAR] [-s SYMBOL] [TAPE=TEXT...]
//
// Options:
//   -g, --grammar PATH      Grammar file (default: $GRAMBLE_GRAMMAR)
//   -s, --symbol NAME       Start symbol (default: the grammar's default)
//   -n COUNT                At most COUNT parses per input
//   --max-recursion N       Times one symbol may be entered along a path
//   --max-chars N           Maximum characters per record
//   -h, --help              Print help

use std::io::{self, BufRead, Write};

use gramble_fsa::{GenOptions, Grammar, Record};

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (common, args) = gramble_cli::parse_args(&args).unwrap_or_else(|e| gramble_cli::fatal(&e));

    if gramble_cli::wants_help(&args) {
        println!("gramble-parse: Find the records of a grammar symbol that match given inputs.");
        println!();
        println!("Usage: gramble-parse [-g GRAMMAR] [-s SYMBOL] [TAPE=TEXT...]");
        println!();
        println!("If TAPE=TEXT arguments are given, parses that input.");
        println!("Otherwise reads one JSON object per line from stdin.");
        println!();
        println!("Options:");
        println!("  -g, --grammar PATH      Grammar file (default: $GRAMBLE_GRAMMAR)");
        println!("  -s, --symbol NAME       Start symbol (default: the grammar's default)");
        println!("  -n COUNT                At most COUNT parses per input");
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

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());

    if !args.is_empty() {
        let inputs = gramble_cli::parse_assignments(&args).unwrap_or_else(|e| gramble_cli::fatal(&e));
        if let Err(e) = run_parse(&loaded.grammar, &symbol, &inputs, &opts, &mut out) {
            let _ = out.flush();
            gramble_cli::fatal(&e);
        }
        return;
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("error reading stdin: {e}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Record>(line) {
            Ok(inputs) => {
                if let Err(e) = run_parse(&loaded.grammar, &symbol, &inputs, &opts, &mut out) {
                    // Keep the parses already printed for earlier lines.
                    let _ = out.flush();
                    gramble_cli::fatal(&e);
                }
            }
            Err(e) => eprintln!("skipping malformed input '{line}': {e}"),
        }
    }
}

fn run_parse(
    grammar: &Grammar,
    symbol: &str,
    inputs: &Record,
    opts: &GenOptions,
    out: &mut impl Write,
) -> Result<(), String> {
    let parses = grammar
        .parse(symbol, inputs, opts)
        .map_err(|e| e.to_string())?;
    let mut found = false;
    for record in parses {
        found = true;
        let _ = writeln!(out, "{}", gramble_cli::format_record(&record));
    }
    if !found {
        let _ = writeln!(out, "(no parse)");
    }
    Ok(())
}
