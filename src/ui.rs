use colored::Colorize;
use netconfig::{Directive, DirectiveKind, Outcome};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Symbol for a directive kind
pub fn directive_symbol(kind: DirectiveKind) -> &'static str {
    match kind {
        DirectiveKind::CreateSubtree => "+",
        DirectiveKind::SetField => "~",
        DirectiveKind::DeleteSubtree => "-",
    }
}

/// Print one directive, colored by kind
pub fn directive(index: usize, directive: &Directive) {
    let symbol = directive_symbol(directive.kind);
    let line = format!("{symbol} {directive}");
    let line = match directive.kind {
        DirectiveKind::CreateSubtree => line.green(),
        DirectiveKind::SetField => line.normal(),
        DirectiveKind::DeleteSubtree => line.red(),
    };
    println!("  {} {}", format!("{:>3}.", index + 1).dimmed(), line);
}

/// Print a result code
pub fn outcome(subject: &str, outcome: Outcome) {
    match outcome {
        Outcome::Ok => success(&format!("{subject}: ok")),
        Outcome::ValidationFailed => warn(&format!("{subject}: validation failed (retry later)")),
        Outcome::Error => error(&format!("{subject}: error")),
    }
}

// ============================================================================
// Tests
// ============================================================================
