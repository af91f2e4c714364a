use crate::batch::BatchFile;
use colored::Colorize;
use std::path::Path;

pub fn handle(file: &Path) -> anyhow::Result<()> {
    let batch = BatchFile::load(file)?;

    println!(
        "{} {} ({} batches, {} commands)",
        "✓".green(),
        file.display(),
        batch.batches.len(),
        batch.command_count()
    );
    for (index, commands) in batch.batches.iter().enumerate() {
        println!("{}", format!("Batch #{}:", index + 1).bold());
        for command in commands {
            println!("  • {}", command.to_string().cyan());
        }
    }
    Ok(())
}
