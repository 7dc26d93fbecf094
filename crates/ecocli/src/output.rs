//! Output formatting for the CLI.

use clap::ValueEnum;
use serde::Serialize;

/// Output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print a list, one item per block in text mode or as a JSON array.
pub fn print_list<T: Serialize + std::fmt::Display>(values: &[T], format: &OutputFormat) {
    match format {
        OutputFormat::Text => {
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    print_divider();
                }
                println!("{}", value);
            }
        }
        OutputFormat::Json => match serde_json::to_string_pretty(values) {
            Ok(json) => println!("{}", json),
            Err(_) => values.iter().for_each(|v| println!("{}", v)),
        },
    }
}

/// Print a success message.
pub fn print_success(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", message),
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({"status": "success", "message": message})
        ),
    }
}

/// Print an error message, with an optional hint on what to do next.
pub fn print_error(message: &str, hint: Option<&str>, format: &OutputFormat) {
    match format {
        OutputFormat::Text => {
            eprintln!("Error: {}", message);
            if let Some(hint) = hint {
                eprintln!("Hint: {}", hint);
            }
        }
        OutputFormat::Json => eprintln!(
            "{}",
            serde_json::json!({"status": "error", "message": message, "hint": hint})
        ),
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
