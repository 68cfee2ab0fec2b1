
use bio::alphabets::dna::revcomp;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::{Deserialize, Serialize};
use simple_error::bail;

/// Stable node identity within a graph.
pub type NodeId = u64;

/// A node in the bidirected graph: an identity and a DNA sequence.
/// Immutable once the graph is constructed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Node {
    /// the stable integer identity
    pub id: NodeId,
    /// the DNA sequence (A/C/G/T/N)
    pub sequence: Vec<u8>
}

/// One side of a node. Edges attach to sides, not to nodes, which is what
/// makes the graph bidirected.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct NodeSide {
    /// the node this side belongs to
    pub node: NodeId,
    /// true for the right (end) side, false for the left (start) side
    pub is_end: bool
}

/// An edge between two node sides. `from_start` attaches the `from` end of the
/// edge to the start side of its node; `to_end` attaches the `to` end to the
/// end side of its node. The edge itself is undirected.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Edge {
    pub from: NodeId,
    pub from_start: bool,
    pub to: NodeId,
    pub to_end: bool
}

impl Edge {
    /// Returns the two sides this edge connects.
    /// The canonical traversal (`from` forward then `to` forward) leaves `from`
    /// through its end side and enters `to` through its start side.
    pub fn sides(&self) -> (NodeSide, NodeSide) {
        (
            NodeSide { node: self.from, is_end: !self.from_start },
            NodeSide { node: self.to, is_end: self.to_end }
        )
    }
}

/// A node visited in a chosen strand. `backward` flips both the spelled
/// sequence (reverse complement) and which side is entered/exited.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct NodeTraversal {
    pub node: NodeId,
    pub backward: bool
}

impl NodeTraversal {
    pub fn new(node: NodeId, backward: bool) -> NodeTraversal {
        NodeTraversal { node, backward }
    }

    /// The same node visited in the opposite strand.
    pub fn reverse(&self) -> NodeTraversal {
        NodeTraversal { node: self.node, backward: !self.backward }
    }

    /// The side this traversal enters through.
    pub fn entry_side(&self) -> NodeSide {
        NodeSide { node: self.node, is_end: self.backward }
    }

    /// The side this traversal exits through.
    pub fn exit_side(&self) -> NodeSide {
        NodeSide { node: self.node, is_end: !self.backward }
    }
}

impl std::fmt::Display for NodeTraversal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.node, if self.backward { "-" } else { "+" })
    }
}

/// A single edit within a mapping. The augmented graph embeds reads as perfect
/// walks, so edits only carry lengths (used to walk base qualities).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Edit {
    /// bases consumed on the node
    pub from_length: usize,
    /// bases consumed on the read
    pub to_length: usize
}

/// One step of an embedded path: a node visited in a strand, with its edits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mapping {
    pub node_id: NodeId,
    pub is_reverse: bool,
    pub edits: Vec<Edit>
}

impl Mapping {
    /// Shorthand for a full-node perfect-match mapping.
    pub fn full(node_id: NodeId, is_reverse: bool, node_len: usize) -> Mapping {
        Mapping {
            node_id,
            is_reverse,
            edits: vec![Edit { from_length: node_len, to_length: node_len }]
        }
    }

    pub fn traversal(&self) -> NodeTraversal {
        NodeTraversal::new(self.node_id, self.is_reverse)
    }

    /// Total read bases consumed by this mapping.
    pub fn to_length(&self) -> usize {
        self.edits.iter().map(|e| e.to_length).sum()
    }
}

/// A position within an embedded path: which path, and which step of it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PathStep {
    pub path_index: usize,
    pub mapping_index: usize
}

/// The bidirected sequence graph plus its embedded-path index.
/// Nodes and edges are fixed after loading; embedded paths are registered once
/// and the index is never mutated during scoring, so iteration is stable.
#[derive(Clone, Debug, Default)]
pub struct VariationGraph {
    /// all nodes by id
    nodes: HashMap<NodeId, Node>,
    /// all edges, in insertion order
    edges: Vec<Edge>,
    /// edge indices incident to each node side
    edges_by_side: HashMap<NodeSide, Vec<usize>>,
    /// normalized (low, high) side pairs for O(1) membership checks
    edge_pairs: HashSet<(NodeSide, NodeSide)>,
    /// embedded path names, in registration order
    path_names: Vec<String>,
    /// path name -> index into `path_names` / `path_mappings`
    path_lookup: HashMap<String, usize>,
    /// the mappings of each embedded path
    path_mappings: Vec<Vec<Mapping>>,
    /// node id -> every embedded path step that lands on it
    node_occurrences: HashMap<NodeId, Vec<PathStep>>
}

impl VariationGraph {
    pub fn new() -> VariationGraph {
        Default::default()
    }

    /// Adds a node to the graph.
    /// # Errors
    /// * if a node with the same id was already added
    pub fn add_node(&mut self, node: Node) -> Result<(), Box<dyn std::error::Error>> {
        if self.nodes.contains_key(&node.id) {
            bail!("duplicate node id in graph: {}", node.id);
        }
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Adds an edge between two node sides. Re-adding an existing edge is a no-op.
    /// # Errors
    /// * if either endpoint node is missing
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), Box<dyn std::error::Error>> {
        if !self.nodes.contains_key(&edge.from) {
            bail!("edge references missing node: {}", edge.from);
        }
        if !self.nodes.contains_key(&edge.to) {
            bail!("edge references missing node: {}", edge.to);
        }
        let (s1, s2) = edge.sides();
        let key = if s1 <= s2 { (s1, s2) } else { (s2, s1) };
        if !self.edge_pairs.insert(key) {
            return Ok(());
        }
        let edge_index = self.edges.len();
        self.edges.push(edge);
        self.edges_by_side.entry(s1).or_default().push(edge_index);
        if s1 != s2 {
            self.edges_by_side.entry(s2).or_default().push(edge_index);
        }
        Ok(())
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All node ids, in arbitrary order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The largest node id in the graph, or 0 for an empty graph.
    pub fn max_node_id(&self) -> NodeId {
        self.nodes.keys().copied().max().unwrap_or(0)
    }

    /// Looks up a node's sequence.
    /// # Errors
    /// * if the node does not exist
    pub fn node_seq(&self, id: NodeId) -> Result<&[u8], Box<dyn std::error::Error>> {
        match self.nodes.get(&id) {
            Some(node) => Ok(&node.sequence),
            None => bail!("graph has no node with id {}", id)
        }
    }

    /// The sequence spelled by a traversal: the node sequence, reverse
    /// complemented when the traversal is backward.
    pub fn traversal_seq(&self, t: NodeTraversal) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        let seq = self.node_seq(t.node)?;
        if t.backward {
            Ok(revcomp(seq))
        } else {
            Ok(seq.to_vec())
        }
    }

    /// The edges incident to a node side.
    pub fn edges_on(&self, side: NodeSide) -> impl Iterator<Item = &Edge> + '_ {
        self.edges_by_side.get(&side)
            .map(|v| &v[..])
            .unwrap_or(&[])
            .iter()
            .map(|&ei| &self.edges[ei])
    }

    /// True if an edge connects the two given sides (in either storage order).
    pub fn has_edge(&self, a: NodeSide, b: NodeSide) -> bool {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.edge_pairs.contains(&key)
    }

    /// Enumerates the oriented nodes reachable by continuing forward out of `t`.
    pub fn next_traversals(&self, t: NodeTraversal) -> Vec<NodeTraversal> {
        let exit = t.exit_side();
        let mut result = vec![];
        for edge in self.edges_on(exit) {
            let (s1, s2) = edge.sides();
            // an edge may connect a side to itself, in which case it is a
            // reversing self loop and yields the flipped traversal once
            if s1 == exit {
                // entering through a start side means forward
                result.push(NodeTraversal::new(s2.node, s2.is_end));
            }
            if s2 == exit && !(s1 == exit && s1 == s2) {
                result.push(NodeTraversal::new(s1.node, s1.is_end));
            }
        }
        result
    }

    /// Enumerates the oriented nodes that can precede `t`.
    pub fn prev_traversals(&self, t: NodeTraversal) -> Vec<NodeTraversal> {
        self.next_traversals(t.reverse())
            .into_iter()
            .map(|n| n.reverse())
            .collect()
    }

    /// Rewrites edges attached start-to-end so that the canonical forward
    /// interpretation reads left to right. Used after unfolding, where every
    /// traversal has a forward copy.
    pub fn flip_doubly_reversed_edges(&mut self) {
        for edge in self.edges.iter_mut() {
            if edge.from_start && edge.to_end {
                std::mem::swap(&mut edge.from, &mut edge.to);
                edge.from_start = false;
                edge.to_end = false;
            }
        }
    }

    /// Registers a named path threaded through the graph.
    /// # Errors
    /// * if the name was already registered
    /// * if any mapping references a missing node
    pub fn embed_path(&mut self, name: &str, mappings: Vec<Mapping>) -> Result<(), Box<dyn std::error::Error>> {
        if self.path_lookup.contains_key(name) {
            bail!("duplicate embedded path name: {:?}", name);
        }
        for mapping in mappings.iter() {
            if !self.nodes.contains_key(&mapping.node_id) {
                bail!("path {:?} maps to missing node {}", name, mapping.node_id);
            }
        }
        let path_index = self.path_names.len();
        self.path_names.push(name.to_string());
        self.path_lookup.insert(name.to_string(), path_index);
        for (mapping_index, mapping) in mappings.iter().enumerate() {
            self.node_occurrences.entry(mapping.node_id)
                .or_default()
                .push(PathStep { path_index, mapping_index });
        }
        self.path_mappings.push(mappings);
        Ok(())
    }

    pub fn path_count(&self) -> usize {
        self.path_names.len()
    }

    pub fn path_name(&self, path_index: usize) -> &str {
        &self.path_names[path_index]
    }

    pub fn path_index(&self, name: &str) -> Option<usize> {
        self.path_lookup.get(name).copied()
    }

    pub fn path_mappings(&self, path_index: usize) -> &[Mapping] {
        &self.path_mappings[path_index]
    }

    /// True if at least one embedded path visits the node.
    pub fn has_node_mapping(&self, id: NodeId) -> bool {
        self.node_occurrences.get(&id).map(|v| !v.is_empty()).unwrap_or(false)
    }

    /// Every embedded path step landing on the node.
    pub fn occurrences_on_node(&self, id: NodeId) -> &[PathStep] {
        self.node_occurrences.get(&id).map(|v| &v[..]).unwrap_or(&[])
    }

    /// The distinct path indices visiting the node.
    pub fn paths_touching_node(&self, id: NodeId) -> Vec<usize> {
        let mut seen: HashSet<usize> = Default::default();
        let mut result = vec![];
        for step in self.occurrences_on_node(id) {
            if seen.insert(step.path_index) {
                result.push(step.path_index);
            }
        }
        result
    }

    pub fn mapping_at(&self, step: PathStep) -> &Mapping {
        &self.path_mappings[step.path_index][step.mapping_index]
    }

    /// The successor of a path position, if the path continues.
    pub fn traverse_right(&self, step: PathStep) -> Option<PathStep> {
        if step.mapping_index + 1 < self.path_mappings[step.path_index].len() {
            Some(PathStep { path_index: step.path_index, mapping_index: step.mapping_index + 1 })
        } else {
            None
        }
    }

    /// The predecessor of a path position, if there is one.
    pub fn traverse_left(&self, step: PathStep) -> Option<PathStep> {
        if step.mapping_index > 0 {
            Some(PathStep { path_index: step.path_index, mapping_index: step.mapping_index - 1 })
        } else {
            None
        }
    }
}
