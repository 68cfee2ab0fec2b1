
use crate::data_types::graph::{NodeId, NodeTraversal, VariationGraph};

use bio::alphabets::dna::revcomp;
use log::{info, warn};
use rustc_hash::FxHashMap as HashMap;
use simple_error::bail;
use std::collections::BTreeMap;

/// A linearization of one embedded path, used to place sites on a coordinate
/// axis and to spell reference alleles for record output.
#[derive(Clone, Debug)]
pub struct ReferenceIndex {
    /// first reference visit of each node: (start offset, visit orientation)
    by_id: HashMap<NodeId, (usize, bool)>,
    /// the oriented node starting at each reference offset
    by_start: BTreeMap<usize, NodeTraversal>,
    /// the full linear reference sequence
    sequence: Vec<u8>,
    /// the embedded path this index was built from
    path_name: String
}

impl ReferenceIndex {
    /// Builds the index by walking the reference path start to end.
    /// Invalid characters at the very head of the path (anything outside
    /// A/C/G/T/N) are dropped with a warning before offsets are assigned.
    /// # Arguments
    /// * `graph` - the graph holding the embedded path
    /// * `ref_path_name` - the path to linearize
    /// # Errors
    /// * if the path is not embedded in the graph
    pub fn new(graph: &VariationGraph, ref_path_name: &str) -> Result<ReferenceIndex, Box<dyn std::error::Error>> {
        let path_index = match graph.path_index(ref_path_name) {
            Some(pi) => pi,
            None => bail!("reference path {:?} is not embedded in the graph", ref_path_name)
        };

        let mut by_id: HashMap<NodeId, (usize, bool)> = Default::default();
        let mut by_start: BTreeMap<usize, NodeTraversal> = BTreeMap::new();
        let mut sequence: Vec<u8> = vec![];
        let mut reference_base: usize = 0;
        let mut previous_reference_base: usize = 0;

        for mapping in graph.path_mappings(path_index).iter() {
            // record only the first visit; later visits of a cycle keep the
            // original coordinates
            by_id.entry(mapping.node_id)
                .or_insert((reference_base, mapping.is_reverse));

            let mut node_seq = graph.node_seq(mapping.node_id)?.to_vec();
            while reference_base == 0 && !node_seq.is_empty()
                && !matches!(node_seq[0], b'A' | b'C' | b'G' | b'T' | b'N') {
                warn!(
                    "Dropping invalid leading character {:?} from node {}",
                    node_seq[0] as char, mapping.node_id
                );
                node_seq.remove(0);
            }

            if mapping.is_reverse {
                sequence.extend(revcomp(&node_seq));
            } else {
                sequence.extend(&node_seq);
            }

            // ranks follow mapping order, so offsets must never step backward
            debug_assert!(reference_base >= previous_reference_base);
            previous_reference_base = reference_base;

            by_start.insert(reference_base, mapping.traversal());
            reference_base += node_seq.len();
        }

        info!("Traced {} bp reference path {:?}", reference_base, ref_path_name);
        Ok(ReferenceIndex {
            by_id,
            by_start,
            sequence,
            path_name: ref_path_name.to_string()
        })
    }

    pub fn path_name(&self) -> &str {
        &self.path_name
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// The first reference visit of a node: (start offset, orientation).
    pub fn first_visit(&self, id: NodeId) -> Option<(usize, bool)> {
        self.by_id.get(&id).copied()
    }

    /// The oriented node whose reference occurrence starts at the offset.
    pub fn traversal_at(&self, offset: usize) -> Option<NodeTraversal> {
        self.by_start.get(&offset).copied()
    }

    /// The reference substring on `[start, end)`.
    pub fn substring(&self, start: usize, end: usize) -> &[u8] {
        &self.sequence[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::graph::{Edge, Mapping, Node};

    fn ref_graph() -> VariationGraph {
        let mut graph = VariationGraph::new();
        for (id, seq) in [(1, "ACA"), (2, "G"), (3, "CTC")] {
            graph.add_node(Node { id, sequence: seq.as_bytes().to_vec() }).unwrap();
        }
        for (from, to) in [(1, 2), (2, 3)] {
            graph.add_edge(Edge { from, from_start: false, to, to_end: false }).unwrap();
        }
        graph.embed_path("ref", vec![
            Mapping::full(1, false, 3),
            Mapping::full(2, false, 1),
            Mapping::full(3, false, 3)
        ]).unwrap();
        graph
    }

    #[test]
    fn test_basic_index() {
        let graph = ref_graph();
        let index = ReferenceIndex::new(&graph, "ref").unwrap();
        assert_eq!(index.sequence(), b"ACAGCTC");
        assert_eq!(index.len(), 7);
        assert_eq!(index.first_visit(1), Some((0, false)));
        assert_eq!(index.first_visit(2), Some((3, false)));
        assert_eq!(index.first_visit(3), Some((4, false)));
        assert!(index.first_visit(9).is_none());
        assert_eq!(index.traversal_at(3), Some(NodeTraversal::new(2, false)));
        assert_eq!(index.substring(3, 4), b"G");
    }

    #[test]
    fn test_missing_path_is_fatal() {
        let graph = ref_graph();
        assert!(ReferenceIndex::new(&graph, "chr1").is_err());
    }

    #[test]
    fn test_reverse_visit() {
        let mut graph = VariationGraph::new();
        graph.add_node(Node { id: 1, sequence: b"AC".to_vec() }).unwrap();
        graph.add_node(Node { id: 2, sequence: b"GGT".to_vec() }).unwrap();
        graph.add_edge(Edge { from: 1, from_start: false, to: 2, to_end: true }).unwrap();
        // the path enters node 2 backward, so its reverse complement is spelled
        graph.embed_path("ref", vec![
            Mapping::full(1, false, 2),
            Mapping::full(2, true, 3)
        ]).unwrap();

        let index = ReferenceIndex::new(&graph, "ref").unwrap();
        assert_eq!(index.sequence(), b"ACACC");
        assert_eq!(index.first_visit(2), Some((2, true)));
    }

    #[test]
    fn test_leading_invalid_bases_trimmed() {
        let mut graph = VariationGraph::new();
        graph.add_node(Node { id: 1, sequence: b"XXAC".to_vec() }).unwrap();
        graph.embed_path("ref", vec![Mapping::full(1, false, 4)]).unwrap();

        let index = ReferenceIndex::new(&graph, "ref").unwrap();
        assert_eq!(index.sequence(), b"AC");
        assert_eq!(index.len(), 2);
    }
}
