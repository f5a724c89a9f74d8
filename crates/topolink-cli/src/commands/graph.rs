use std::fs;

use anyhow::{Context, Result};
use topolink_cli::{AppConfig, GraphCommands};
use topolink_core::{graph_utils, FeederGraph};

use super::{feeder_records, open_store};

pub fn handle(config: &AppConfig, command: &GraphCommands) -> Result<()> {
    let store = open_store(config)?;
    match command {
        GraphCommands::Stats { feeder } => {
            let graph = FeederGraph::build(&feeder_records(&store, feeder)?);
            let stats = graph_utils::graph_stats(&graph);
            println!("Graph statistics for {feeder}:");
            println!("  Devices       : {}", stats.device_count);
            println!("  Nodes         : {}", stats.node_count);
            println!("  Components    : {}", stats.connected_components);
            println!(
                "  Degree [min/avg/max]: {}/{:.2}/{}",
                stats.min_degree, stats.avg_degree, stats.max_degree
            );
            println!("  Max fan-out   : {}", stats.max_node_fanout);
            println!("  Dead ends     : {}", stats.dead_ends);
            Ok(())
        }
        GraphCommands::Islands { feeder, emit } => {
            let graph = FeederGraph::build(&feeder_records(&store, feeder)?);
            let components = graph.components();
            for (index, (representative, members)) in components.by_size().into_iter().enumerate() {
                println!(
                    "Island {index}: {} device(s), representative {representative}",
                    members.len()
                );
                if *emit {
                    for member in members {
                        println!("  {member}");
                    }
                }
            }
            Ok(())
        }
        GraphCommands::Export {
            feeder,
            format,
            out,
        } => {
            let graph = FeederGraph::build(&feeder_records(&store, feeder)?);
            let rendered = graph_utils::export_graph(&graph, format)?;
            match out {
                Some(path) => {
                    fs::write(path, &rendered)
                        .with_context(|| format!("writing graph export '{}'", path.display()))?;
                    println!("Graph for {feeder} written to {}", path.display());
                }
                None => println!("{rendered}"),
            }
            Ok(())
        }
    }
}
