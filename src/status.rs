//! Colored operator-facing status lines.
//!
//! These are deliberately plain `println!`/`eprintln!` output rather than
//! tracing events: they are meant to be seen on the console regardless of
//! the configured log level.

use std::error::Error;

const GREEN: &str = "\x1b[1;32m";
const RED: &str = "\x1b[1;31m";
const RESET: &str = "\x1b[0m";

pub fn ok(message: &str) {
    println!("{GREEN}{message}{RESET}");
}

pub fn stopped(service: &str) {
    println!("{RED}{service} stopped{RESET}");
}

/// Print the marked error line followed by the full cause chain on stderr.
pub fn failure(err: &dyn Error) {
    eprintln!("{RED}Bootstrap error: {err}{RESET}");
    for line in cause_chain(err) {
        eprintln!("  caused by: {line}");
    }
}

/// Display strings of every `source()` below `err`, outermost first.
pub fn cause_chain(err: &dyn Error) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = err.source();
    while let Some(cause) = current {
        chain.push(cause.to_string());
        current = cause.source();
    }
    chain
}
