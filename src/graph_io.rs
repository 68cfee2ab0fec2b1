
use crate::data_types::alignment::Alignment;
use crate::data_types::graph::{Edge, Edit, Mapping, Node, VariationGraph};

use flate2::bufread::MultiGzDecoder;
use log::{debug, info};
use serde::Deserialize;
use simple_error::bail;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// On-disk form of a graph node.
#[derive(Debug, Deserialize)]
struct WireNode {
    id: u64,
    sequence: String
}

/// On-disk form of an edge; omitted side flags default to the canonical
/// end-to-start attachment.
#[derive(Debug, Deserialize)]
struct WireEdge {
    from: u64,
    to: u64,
    #[serde(default)]
    from_start: bool,
    #[serde(default)]
    to_end: bool
}

#[derive(Debug, Default, Deserialize)]
struct WireEdit {
    #[serde(default)]
    from_length: usize,
    #[serde(default)]
    to_length: usize
}

#[derive(Debug, Deserialize)]
struct WireMapping {
    node_id: u64,
    #[serde(default)]
    is_reverse: bool,
    #[serde(default)]
    edits: Vec<WireEdit>
}

#[derive(Debug, Default, Deserialize)]
struct WirePath {
    #[serde(default)]
    name: String,
    #[serde(default)]
    mappings: Vec<WireMapping>
}

/// On-disk form of the whole graph file.
#[derive(Debug, Deserialize)]
struct WireGraph {
    #[serde(default)]
    nodes: Vec<WireNode>,
    #[serde(default)]
    edges: Vec<WireEdge>,
    #[serde(default)]
    paths: Vec<WirePath>
}

/// One JSON line of the alignments file.
#[derive(Debug, Deserialize)]
struct WireAlignment {
    #[serde(default)]
    name: String,
    sequence: String,
    #[serde(default)]
    quality: Vec<u8>,
    #[serde(default)]
    mapping_quality: u8,
    #[serde(default)]
    path: WirePath
}

/// Opens a file for buffered reading, transparently decompressing `.gz` inputs.
/// # Arguments
/// * `filename` - the path to open
/// # Errors
/// * if the file cannot be opened
pub fn open_reader(filename: &Path) -> Result<Box<dyn BufRead>, Box<dyn std::error::Error>> {
    let file = File::open(filename)?;
    let buffered = BufReader::new(file);
    if filename.extension().unwrap_or_default() == "gz" {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(buffered))))
    } else {
        Ok(Box::new(buffered))
    }
}

/// Converts wire mappings into internal mappings, synthesizing a full-node
/// perfect-match edit when the file omitted edits.
fn convert_mappings(graph: &VariationGraph, wire: Vec<WireMapping>) -> Result<Vec<Mapping>, Box<dyn std::error::Error>> {
    let mut mappings: Vec<Mapping> = Vec::with_capacity(wire.len());
    for wm in wire.into_iter() {
        let edits: Vec<Edit> = if wm.edits.is_empty() {
            let node_len = graph.node_seq(wm.node_id)?.len();
            vec![Edit { from_length: node_len, to_length: node_len }]
        } else {
            wm.edits.into_iter()
                .map(|we| Edit { from_length: we.from_length, to_length: we.to_length })
                .collect()
        };
        mappings.push(Mapping { node_id: wm.node_id, is_reverse: wm.is_reverse, edits });
    }
    Ok(mappings)
}

/// Parses a graph from a JSON reader and builds the internal representation,
/// embedding any paths the file carries (e.g. the reference path).
/// # Arguments
/// * `reader` - the JSON source
/// # Errors
/// * on malformed JSON, duplicate ids, or mappings referencing missing nodes
pub fn read_graph<R: BufRead>(reader: R) -> Result<VariationGraph, Box<dyn std::error::Error>> {
    let wire: WireGraph = serde_json::from_reader(reader)?;

    let mut graph = VariationGraph::new();
    for wn in wire.nodes.into_iter() {
        graph.add_node(Node {
            id: wn.id,
            sequence: wn.sequence.to_ascii_uppercase().into_bytes()
        })?;
    }
    for we in wire.edges.into_iter() {
        graph.add_edge(Edge {
            from: we.from,
            from_start: we.from_start,
            to: we.to,
            to_end: we.to_end
        })?;
    }
    for wp in wire.paths.into_iter() {
        if wp.name.is_empty() {
            bail!("graph file contains a path with no name");
        }
        let mappings = convert_mappings(&graph, wp.mappings)?;
        graph.embed_path(&wp.name, mappings)?;
    }
    Ok(graph)
}

/// Loads a graph file from disk.
pub fn load_graph(filename: &Path) -> Result<VariationGraph, Box<dyn std::error::Error>> {
    let reader = open_reader(filename)?;
    let graph = read_graph(reader)?;
    info!(
        "Loaded graph: {} nodes, {} edges, {} embedded paths",
        graph.node_count(), graph.edge_count(), graph.path_count()
    );
    Ok(graph)
}

/// Parses JSON-lines alignments and embeds each read's path into the graph.
/// Unnamed reads receive a generated unique name.
/// # Arguments
/// * `reader` - the JSON-lines source
/// * `graph` - the augmented graph the reads are threaded through
/// # Errors
/// * on malformed JSON, duplicate read names, or paths touching missing nodes
pub fn read_alignments<R: BufRead>(reader: R, graph: &mut VariationGraph) -> Result<Vec<Alignment>, Box<dyn std::error::Error>> {
    let mut alignments: Vec<Alignment> = vec![];
    for (line_index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let wire: WireAlignment = match serde_json::from_str(&line) {
            Ok(wa) => wa,
            Err(e) => bail!("alignment line {}: {}", line_index + 1, e)
        };

        let name = if wire.name.is_empty() {
            format!("_unnamed_alignment_{}", line_index)
        } else {
            wire.name
        };
        if wire.path.mappings.is_empty() {
            bail!("alignment {:?} has no path through the graph", name);
        }

        let mappings = convert_mappings(graph, wire.path.mappings)?;
        graph.embed_path(&name, mappings.clone())?;

        alignments.push(Alignment {
            name,
            sequence: wire.sequence.to_ascii_uppercase().into_bytes(),
            quality: wire.quality,
            mapping_quality: wire.mapping_quality,
            path: mappings
        });
    }
    debug!("Parsed {} alignment records", alignments.len());
    Ok(alignments)
}

/// Loads an alignments file from disk and embeds the reads into the graph.
pub fn load_alignments(filename: &Path, graph: &mut VariationGraph) -> Result<Vec<Alignment>, Box<dyn std::error::Error>> {
    let reader = open_reader(filename)?;
    let alignments = read_alignments(reader, graph)?;
    info!("Loaded {} read alignments", alignments.len());
    Ok(alignments)
}
