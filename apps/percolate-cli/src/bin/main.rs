use std::collections::BTreeSet;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use percolate_cluster::Node;
use percolate_core::config::{resolve_with_base, Config};
use percolate_core::content::{encode, ContentFormat};
use percolate_core::types::DocRef;

/// One line of a queries file.
#[derive(Debug, Deserialize)]
struct QueryLine {
    index: String,
    id: String,
    #[serde(default)]
    routing: Option<String>,
    source: Value,
}

/// One line of a documents file.
#[derive(Debug, Deserialize)]
struct DocLine {
    index: String,
    #[serde(rename = "type")]
    doc_type: String,
    id: String,
    source: Value,
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() {
        eprintln!("Usage: {} mpercolate <queries.ndjson> <batch.ndjson> [docs.ndjson]", prog);
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

fn read_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> anyhow::Result<Vec<T>> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(n, l)| serde_json::from_str(l).map_err(|e| anyhow::anyhow!("{}:{}: {}", path.display(), n + 1, e)))
        .collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();

    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let settings = config.settings()?;
    let (cmd, args) = parse_args();
    match cmd.as_str() {
        "mpercolate" => {
            let cwd = env::current_dir()?;
            let path_arg = |i: usize| -> Option<PathBuf> { args.get(i).map(|p| resolve_with_base(&cwd, p)) };
            let (Some(queries_path), Some(batch_path)) = (path_arg(0), path_arg(1)) else {
                eprintln!("Usage: percolate-cli mpercolate <queries.ndjson> <batch.ndjson> [docs.ndjson]");
                std::process::exit(1)
            };
            let queries: Vec<QueryLine> = read_lines(&queries_path)?;
            let docs: Vec<DocLine> = match path_arg(2) { Some(p) => read_lines(&p)?, None => Vec::new() };
            let format: ContentFormat = config.get::<String>("output.format").unwrap_or_else(|_| "json".to_string()).parse().map_err(anyhow::Error::msg)?;

            let node = Node::new(settings)?;
            let indices: BTreeSet<&str> = queries.iter().map(|q| q.index.as_str()).chain(docs.iter().map(|d| d.index.as_str())).collect();
            for index in indices { node.create_index(index, None)?; }
            for q in &queries { node.register_query(&q.index, &q.id, &q.source, q.routing.as_deref())?; }
            for d in docs { node.index_document(&DocRef::new(d.index, d.doc_type, d.id), d.source)?; }
            node.refresh_all();
            info!(queries = queries.len(), "loaded percolator queries");

            let batch = std::fs::read(&batch_path)?;
            let response = tokio::runtime::Runtime::new()?.block_on(node.multi_percolate_ndjson(&batch))?;
            let mut out = std::io::stdout().lock();
            out.write_all(&encode(&response, format)?)?;
            if format != ContentFormat::Cbor { writeln!(out)?; }
        }
        _ => { eprintln!("Unknown command: {}", cmd); std::process::exit(1); }
    }
    Ok(())
}
