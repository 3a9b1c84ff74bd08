//! Thin, non-interactive demonstration harness over [`lsmkv::LsmTree`].
//!
//! Since the engine holds no persisted state (it is ephemeral by design — see the
//! engine's module docs), a single process invocation owns exactly one engine for its
//! lifetime. `run` reads a script of line-oriented commands and executes them all
//! against one engine instance, which is how multi-step scenarios are demonstrated
//! without an interactive shell. The individual subcommands (`put`, `get`, …) are
//! useful for one-off scripting but each starts from an empty engine.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::*;
use lsmkv::engine::{GetResult, LsmTree, ReadStep, WriteResult};
use lsmkv::{EngineConfig, EngineError};

#[derive(Parser, Debug)]
#[command(name = "lsmkv-cli", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Insert or update a key.
    Put { key: String, value: Vec<String> },
    /// Look up a key and print its search path.
    Get { key: String },
    /// Insert a tombstone for a key.
    Delete { key: String },
    /// Compact one level into the next.
    Compact { level: u32 },
    /// Print the statistics snapshot of a freshly created engine (mostly useful as a
    /// sanity check; pair with `run` to see non-trivial stats).
    Stats,
    /// Reset is a no-op on a one-shot invocation; kept for command-surface parity.
    Clear,
    /// Execute a newline-delimited command script against a single engine instance.
    Run { script: PathBuf },
    /// Print the command summary.
    Help,
}

fn main() {
    let cli = Cli::parse();
    let mut tree = LsmTree::new(EngineConfig::default());

    let code = match cli.command {
        Command::Put { key, value } => {
            let value = value.join(" ");
            run_put(&mut tree, &key, &value)
        }
        Command::Get { key } => run_get(&mut tree, &key),
        Command::Delete { key } => run_delete(&mut tree, &key),
        Command::Compact { level } => run_compact(&mut tree, level),
        Command::Stats => {
            print_stats(&tree);
            0
        }
        Command::Clear => {
            success("store is cleared");
            0
        }
        Command::Run { script } => run_script(&mut tree, &script),
        Command::Help => {
            print_help();
            0
        }
    };

    std::process::exit(code);
}

fn run_script(tree: &mut LsmTree, path: &PathBuf) -> i32 {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            fail(&format!("could not read script {path:?}: {e}"));
            return 1;
        }
    };

    let mut last_code = 0;
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let code = execute_line(tree, line);
        if code != 0 {
            fail(&format!("line {} failed: {line}", lineno + 1));
            last_code = code;
        }
    }
    last_code
}

fn execute_line(tree: &mut LsmTree, line: &str) -> i32 {
    let mut parts = line.split_whitespace();
    let verb = match parts.next() {
        Some(v) => v.to_ascii_uppercase(),
        None => return 0,
    };
    let rest: Vec<&str> = parts.collect();

    match verb.as_str() {
        "PUT" => {
            if rest.len() < 2 {
                fail("PUT requires a key and a value");
                return 1;
            }
            run_put(tree, rest[0], &rest[1..].join(" "))
        }
        "GET" => {
            if rest.is_empty() {
                fail("GET requires a key");
                return 1;
            }
            run_get(tree, rest[0])
        }
        "DELETE" => {
            if rest.is_empty() {
                fail("DELETE requires a key");
                return 1;
            }
            run_delete(tree, rest[0])
        }
        "COMPACT" => {
            if rest.is_empty() {
                fail("COMPACT requires a level");
                return 1;
            }
            match rest[0].parse::<u32>() {
                Ok(level) => run_compact(tree, level),
                Err(_) => {
                    fail(&format!("expected an integer level, got {:?}", rest[0]));
                    1
                }
            }
        }
        "STATS" => {
            print_stats(tree);
            0
        }
        "CLEAR" => {
            let _ = tree.clear();
            success("store is cleared");
            0
        }
        "HELP" => {
            print_help();
            0
        }
        other => {
            fail(&format!("unknown command: {other}"));
            1
        }
    }
}

fn run_put(tree: &mut LsmTree, key: &str, value: &str) -> i32 {
    match tree.put(key.as_bytes().to_vec(), value.as_bytes().to_vec()) {
        Ok(result) => {
            report_write(key, &result);
            0
        }
        Err(e) => {
            fail_engine_error(&e);
            1
        }
    }
}

fn run_get(tree: &mut LsmTree, key: &str) -> i32 {
    match tree.get(key.as_bytes()) {
        Ok(result) => {
            report_read(key, &result);
            0
        }
        Err(e) => {
            fail_engine_error(&e);
            1
        }
    }
}

fn run_delete(tree: &mut LsmTree, key: &str) -> i32 {
    match tree.delete(key.as_bytes().to_vec()) {
        Ok(_) => {
            success(&format!("deleted: {key}"));
            0
        }
        Err(e) => {
            fail_engine_error(&e);
            1
        }
    }
}

fn run_compact(tree: &mut LsmTree, level: u32) -> i32 {
    match tree.compact(level) {
        Ok(result) => {
            match result.record {
                Some(r) => info(&format!(
                    "compacted L{} -> L{} ({} tables, {} records out, {} duplicates removed)",
                    r.source_level, r.target_level, r.source_table_count, r.output_record_count, r.duplicates_removed
                )),
                None => info(&format!("compaction L{level} produced no output table")),
            }
            0
        }
        Err(e) => {
            fail_engine_error(&e);
            1
        }
    }
}

fn report_write(key: &str, result: &WriteResult) {
    success(&format!(
        "put: {key} ({:?}, flushed={}, compacted_levels={})",
        result.outcome,
        result.flushed,
        result.compacted_levels.len()
    ));
}

fn report_read(key: &str, result: &GetResult) {
    match result.found() {
        Some(v) => info(&format!("{key} = {}", String::from_utf8_lossy(v))),
        None if result.is_tombstone() => warn(&format!("{key} was deleted")),
        None => warn(&format!("key not found: {key}")),
    }

    let steps: Vec<String> = result
        .search_path
        .iter()
        .map(|step| match step {
            ReadStep::Memtable { hit } => format!("memtable(hit={hit})"),
            ReadStep::SSTable(s) => format!(
                "L{}#{}(hit={}, bloom_saved={})",
                s.level, s.table_id, s.hit, s.bloom_saved
            ),
        })
        .collect();
    println!("  path: {}", steps.join(" -> ").dimmed());
}

fn print_stats(tree: &LsmTree) {
    let stats = tree.stats();
    info(&format!(
        "memtable: {} records, height {}, ~{} bytes",
        stats.memtable_len, stats.memtable_height, stats.memtable_estimated_bytes
    ));
    for level in &stats.levels {
        info(&format!(
            "L{}: {} tables, ~{} bytes",
            level.level, level.table_count, level.estimated_bytes
        ));
    }
    info(&format!(
        "compactions: {}, write amplification: {:.3}",
        stats.compaction_count, stats.write_amplification
    ));
}

fn print_help() {
    println!("{}", "lsmkv-cli commands:".bold());
    println!("  PUT key value...   insert/update a key");
    println!("  GET key            point lookup");
    println!("  DELETE key         tombstone a key");
    println!("  COMPACT level      compact level N into N+1");
    println!("  STATS              print the statistics snapshot");
    println!("  CLEAR              reset engine state");
    println!("  HELP               print this summary");
    println!();
    println!("Use `run <script>` to execute a sequence of these against one engine.");
}

fn fail_engine_error(e: &EngineError) {
    fail(&e.to_string());
}

fn success(msg: &str) {
    println!("{} {}", "✔".bright_green().bold(), msg.normal());
}

fn warn(msg: &str) {
    eprintln!("{} {}", "⚠".bright_yellow().bold(), msg.yellow());
}

fn info(msg: &str) {
    println!("{} {}", "➤".bright_cyan().bold(), msg.cyan());
}

fn fail(msg: &str) {
    eprintln!("{} {}", "✘".bright_red().bold(), msg.red());
}
