use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use whisper_graph::config::GraphConfig;
use whisper_graph::selection::Selection;
use whisper_graph::type_resolver::EdgeTypeKey;
use whisper_graph::serialize::GraphData;

#[derive(Parser, Debug)]
#[command(
    name = "whisper-graph",
    version,
    about = "Print the types, schemes and degree summary of a saved graph"
)]
struct Cli {
    #[arg(value_name = "GRAPH", help = "Graph saved as JSON")]
    graph: PathBuf,

    #[arg(long, value_name = "FILE", help = "JSON config overriding the saved one")]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let Cli { graph: graph_path, config: config_path } = Cli::parse();

    let text = std::fs::read_to_string(&graph_path)
        .with_context(|| format!("reading {}", graph_path.display()))?;
    let mut data: GraphData = serde_json::from_str(&text)?;
    if let Some(path) = config_path {
        data.config = GraphConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;
    }
    log::info!("using {:?} backend", data.config.backend);
    let graph = data.into_graph()?;

    println!("{graph}");
    for ntype in graph.ntypes() {
        println!("node type {ntype:?}");
        for (field, scheme) in graph.node_attr_schemes(Some(ntype.as_str()))? {
            println!("  {field}: {scheme}");
        }
    }
    for etype in graph.canonical_etypes() {
        let key: Option<EdgeTypeKey> = Some(etype.into());
        let relation = graph
            .index()
            .relation(graph.type_resolver().resolve_edge_type(key.as_ref())?);
        let in_degrees = graph.in_degrees(Selection::All, key.clone())?;
        let max_in = in_degrees.iter().max().copied().unwrap_or(0);
        let isolated = in_degrees.iter().filter(|d| **d == 0).count();
        println!(
            "edge type {etype}: {} edges, max in-degree {max_in}, {isolated} destinations without in-edges",
            relation.num_edges()
        );
        if relation.is_multigraph() {
            println!("  has parallel edges");
        }
        for (field, scheme) in graph.edge_attr_schemes(key)? {
            println!("  {field}: {scheme}");
        }
    }
    Ok(())
}
