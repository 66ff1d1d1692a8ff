//! The `stats` command: summary counts for the decision store.

use std::path::Path;

use crate::error::Result;
use crate::store::Store;

const TOP_ENTITIES: usize = 15;

pub async fn run_stats(db_path: &Path) -> Result<()> {
    let store = Store::open_existing(db_path).await?;
    let stats = store.get_stats().await?;

    println!("Decision store: {}", db_path.display());
    println!();
    println!("  Sources:   {}", stats.total_sources);
    for (source_type, count) in &stats.by_source_type {
        if *count > 0 {
            println!("    {source_type:<10} {count}");
        }
    }
    println!("  Decisions: {}", stats.total_decisions);
    println!("  Learnings: {}", stats.total_learnings);
    for (category, count) in &stats.learnings_by_category {
        if *count > 0 {
            println!("    {category:<15} {count}");
        }
    }
    println!("  Entities:  {}", stats.unique_entities);

    let entities = store.get_entities().await?;
    if !entities.is_empty() {
        println!("\nTop entities:");
        for (entity, count) in entities.iter().take(TOP_ENTITIES) {
            println!(
                "  {:<24} {:<12} {} decision(s)",
                entity.name, entity.entity_type, count
            );
        }
    }
    Ok(())
}
