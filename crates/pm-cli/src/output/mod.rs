//! Output formatting utilities for the CLI
//!
//! Renders the forwarding plan as a table and prints colored status
//! messages.

use tabled::{settings::Style, Table, Tabled};

use crate::commands::ForwardPlan;

/// Format a forwarding plan as an ASCII table
///
/// One row per forwarded port, with the headers each stream will carry.
pub fn format_plan(plan: &ForwardPlan) -> String {
    #[derive(Tabled)]
    struct RouteRow {
        #[tabled(rename = "LOCAL")]
        local: String,
        #[tabled(rename = "REMOTE")]
        remote: String,
        #[tabled(rename = "HEADERS")]
        headers: String,
    }

    let rows: Vec<RouteRow> = plan
        .routes
        .iter()
        .map(|route| RouteRow {
            local: format!("{}:{}", plan.bind_host, route.mapping.local),
            remote: format!("{} port {}", plan.remote, route.mapping.remote),
            headers: truncate(&route.headers.to_string(), 60),
        })
        .collect();

    format!(
        "Dry run: would connect to {}\n{}",
        plan.remote,
        Table::new(rows).with(Style::rounded())
    )
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
///
/// Outputs to stdout with green coloring for positive feedback to the user.
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr with red coloring for error feedback to the user.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
///
/// Outputs to stderr with yellow coloring for cautionary feedback to the user.
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
///
/// Outputs to stdout with cyan coloring for informational feedback to the user.
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
