use anyhow::Result;
use chrono::Utc;
use verity_core::{registry::NodeRecord, VerityClient};

use super::utils::print_info;

fn status(node: &NodeRecord) -> String {
    match node.blacklisted_until {
        Some(until) if until > Utc::now() => format!("blacklisted until {}", until.format("%Y-%m-%d %H:%M:%S")),
        _ => "active".to_string(),
    }
}

pub async fn list_nodes(client: &VerityClient, chain: &str, refresh: bool) -> Result<()> {
    if refresh {
        let summary = client.refresh_registry(chain).await?;
        print_info(&format!(
            "Registry refreshed: {} added, {} updated, {} removed",
            summary.added, summary.updated, summary.removed
        ));
    }

    let nodes = client.nodes(chain)?;
    println!("{:<48} {:>6} {:>8} {:>7} {:>10}  STATUS", "NODE", "WEIGHT", "FAILURES", "STRIKES", "LAST BLOCK");
    for node in &nodes {
        println!(
            "{:<48} {:>6} {:>8} {:>7} {:>10}  {}",
            node.id.as_str(),
            node.weight,
            node.failure_count,
            node.verification_strikes,
            node.last_seen_block,
            status(node)
        );
    }
    println!("\n{} nodes", nodes.len());
    Ok(())
}
