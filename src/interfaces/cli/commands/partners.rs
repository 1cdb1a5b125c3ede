//! Partner import command

use std::fs;
use std::sync::Arc;

use colored::Colorize;

use crate::interfaces::cli::CliError;
use crate::storage::{Partner, SeaOrmStorage};

/// 解析合作方 JSON（数组或单个对象）
pub fn parse_partners(content: &str) -> Result<Vec<Partner>, CliError> {
    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| CliError::ParseError(format!("Invalid JSON: {}", e)))?;

    let partners = if value.is_array() {
        serde_json::from_value::<Vec<Partner>>(value)
    } else {
        serde_json::from_value::<Partner>(value).map(|p| vec![p])
    };

    partners.map_err(|e| CliError::ParseError(format!("Invalid partner definition: {}", e)))
}

pub async fn import_partners(
    storage: Arc<SeaOrmStorage>,
    file_path: String,
) -> Result<(), CliError> {
    let content = fs::read_to_string(&file_path).map_err(|e| {
        CliError::CommandError(format!("Failed to read '{}': {}", file_path, e))
    })?;

    let partners = parse_partners(&content)?;
    if partners.is_empty() {
        println!("{} No partners found in {}", "ℹ".bold().blue(), file_path);
        return Ok(());
    }

    let mut imported = 0usize;
    let mut failed = 0usize;
    for partner in &partners {
        match storage.upsert_partner(partner).await {
            Ok(()) => {
                imported += 1;
                println!("  {} {} ({})", "✓".green(), partner.id.cyan(), partner.name);
            }
            Err(e) => {
                failed += 1;
                println!("  {} {}: {}", "✗".red(), partner.id.cyan(), e);
            }
        }
    }

    println!(
        "{} Imported {} partner(s), {} failed",
        "✓".bold().green(),
        imported,
        failed
    );

    if failed > 0 {
        return Err(CliError::CommandError(format!(
            "{} partner(s) could not be imported",
            failed
        )));
    }
    Ok(())
}
