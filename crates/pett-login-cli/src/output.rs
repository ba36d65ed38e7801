//! Output formatting for the CLI.

use clap::ValueEnum;
use login_handshake::SessionSnapshot;
use serde::Serialize;

/// Output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: failed to serialize output: {}", e),
    }
}

/// Print an error message.
pub fn print_error(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => eprintln!("Error: {}", message),
        OutputFormat::Json => {
            eprintln!(
                "{}",
                serde_json::json!({ "status": "error", "message": message })
            );
        }
    }
}

/// Print a table row.
pub fn print_row(label: &str, value: &str) {
    println!("  {:<16} {}", format!("{}:", label), value);
}

/// Print a divider line.
pub fn print_divider() {
    println!("{}", "-".repeat(50));
}

/// Print a heading.
pub fn print_heading(text: &str) {
    println!("\n{}", text);
    print_divider();
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Print a session snapshot.
pub fn print_snapshot(title: &str, snapshot: &SessionSnapshot, format: &OutputFormat) {
    match format {
        OutputFormat::Json => print_json(snapshot),
        OutputFormat::Text => {
            print_heading(title);
            print_row("State", &format!("{:?}", snapshot.state));
            print_row("Authenticated", yes_no(snapshot.authenticated));
            print_row(
                "Pet",
                snapshot.pet_identity.as_deref().unwrap_or("(none)"),
            );
            if snapshot.requires_registration {
                print_row("Registration", "required");
            }
            if let Some(error) = &snapshot.last_error {
                print_row("Last error", error);
            }
            if let Some(status) = &snapshot.progress.status {
                print_row("Popup", &format!("{} ({})", status, snapshot.progress.message));
            }
            print_row("Reset seq", &snapshot.reset_seq.to_string());
            print_row("Forced logout", yes_no(snapshot.force_logout_pending));
        }
    }
}

/// Print the backend health report.
pub fn print_health(report: &pett_backend::HealthReport, format: &OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Text => {
            print_heading("Backend health");
            print_row("Authenticated", yes_no(report.is_authenticated()));
            print_row("Token present", yes_no(report.websocket.auth_token_present));
            print_row("Connected", yes_no(report.websocket.connected));
            print_row("Pet", report.pet_name().unwrap_or("(none)"));
        }
    }
}
