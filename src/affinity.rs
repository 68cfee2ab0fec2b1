
use crate::data_types::alignment::Alignment;
use crate::data_types::graph::{NodeTraversal, VariationGraph};
use crate::data_types::locus::{Affinity, Allele, Site};
use crate::sequence_alignment::alignment_identity;

use bio::alphabets::dna::revcomp;
use log::{debug, warn};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

/// The read's walk restricted to the nodes of the site, in path order.
pub fn site_traversal_of_read(site: &Site, alignment: &Alignment) -> Vec<NodeTraversal> {
    alignment.path.iter()
        .filter(|m| site.contents.contains(&m.node_id))
        .map(|m| m.traversal())
        .collect()
}

/// A read is informative about a site when it touches at least two distinct
/// site nodes, or at least one internal (non-endpoint) node. A read brushing
/// only one anchor says nothing about the interior.
fn is_informative(site: &Site, alignment: &Alignment) -> bool {
    let mut touched: HashSet<u64> = Default::default();
    for mapping in alignment.path.iter() {
        if site.contents.contains(&mapping.node_id) {
            touched.insert(mapping.node_id);
        }
    }
    if touched.len() >= 2 {
        return true;
    }
    touched.remove(&site.start.node);
    touched.remove(&site.end.node);
    !touched.is_empty()
}

/// The names of reads whose embedded paths touch any node of the site.
fn relevant_read_names<'a>(
    graph: &'a VariationGraph,
    reads_by_name: &HashMap<String, Alignment>,
    site: &Site
) -> Vec<&'a str> {
    let mut seen: HashSet<&str> = Default::default();
    let mut names: Vec<&str> = vec![];
    for &id in site.contents.iter() {
        for step in graph.occurrences_on_node(id) {
            let name = graph.path_name(step.path_index);
            if reads_by_name.contains_key(name) && seen.insert(name) {
                names.push(name);
            }
        }
    }
    names.sort_unstable();
    names
}

/// Scores every site-relevant read against every allele.
///
/// The default fast mode decides consistency purely from sequence identity of
/// the read's site sub-walk: an exact match when the read spans the whole
/// site, a prefix match when it is anchored at the start only, a suffix match
/// when anchored at the end only. Reads anchored at neither end are logged
/// and skipped. The realign mode instead scores each allele by edit-distance
/// identity in both orientations and keeps the better one as the weight.
/// # Arguments
/// * `graph` - the augmented graph
/// * `reads_by_name` - every loaded read, keyed by its unique name
/// * `site` - the site under consideration
/// * `alleles` - the candidate alleles from the traversal finder
/// * `realign` - use the slower identity scoring instead of the fast rules
/// * `min_recurrence` - the active recurrence filter, used only to decide
///   whether an unsupported read warrants a warning
pub fn compute_affinities(
    graph: &VariationGraph,
    reads_by_name: &HashMap<String, Alignment>,
    site: &Site,
    alleles: &[Allele],
    realign: bool,
    min_recurrence: usize
) -> Result<HashMap<String, Vec<Affinity>>, Box<dyn std::error::Error>> {
    let mut affinities: HashMap<String, Vec<Affinity>> = Default::default();

    for name in relevant_read_names(graph, reads_by_name, site) {
        let read = &reads_by_name[name];
        if !is_informative(site, read) {
            debug!("Read {:?} touches only one anchor of site {}..{}, skipping", name, site.start, site.end);
            continue;
        }

        let mut read_traversal = site_traversal_of_read(site, read);
        let mut is_reverse = false;
        if read_traversal.first() == Some(&site.end.reverse())
            || read_traversal.last() == Some(&site.start.reverse()) {
            // the read ran through the site on the other strand; canonicalize
            read_traversal.reverse();
            for item in read_traversal.iter_mut() {
                *item = item.reverse();
            }
            is_reverse = true;
        }

        let mut seq: Vec<u8> = vec![];
        for &t in read_traversal.iter() {
            seq.extend(graph.traversal_seq(t)?);
        }

        let read_affinities = if realign {
            score_by_identity(&seq, alleles, is_reverse)
        } else {
            let starts_at_start = read_traversal.first() == Some(&site.start);
            let ends_at_end = read_traversal.last() == Some(&site.end);
            if !starts_at_start && !ends_at_end {
                warn!("Read {:?} doesn't touch either end of site {}..{}, skipping", name, site.start, site.end);
                continue;
            }
            score_by_anchoring(&seq, alleles, is_reverse, starts_at_start, ends_at_end)
        };

        let total_supported = read_affinities.iter().filter(|a| a.consistent).count();
        if total_supported == 0 && min_recurrence <= 1 {
            // with no allele filtering in effect, every embedded read ought to
            // match at least the allele it spelled
            warn!("Read {:?} supports no allele at site {}..{}", name, site.start, site.end);
        }

        affinities.insert(name.to_string(), read_affinities);
    }

    Ok(affinities)
}

/// Fast-mode consistency: exact, prefix, or suffix match depending on which
/// ends of the site the read is anchored to.
fn score_by_anchoring(
    seq: &[u8],
    alleles: &[Allele],
    is_reverse: bool,
    starts_at_start: bool,
    ends_at_end: bool
) -> Vec<Affinity> {
    alleles.iter()
        .map(|allele| {
            let allele_seq = allele.sequence.as_bytes();
            let consistent = if starts_at_start && ends_at_end {
                seq == allele_seq
            } else if starts_at_start {
                allele_seq.starts_with(seq)
            } else {
                allele_seq.ends_with(seq)
            };
            Affinity {
                consistent,
                is_reverse,
                weight: if consistent { 1.0 } else { 0.0 }
            }
        })
        .collect()
}

/// Realign-mode scoring: edit-distance identity of the read's site sequence
/// against each allele, taking the better of the two orientations.
fn score_by_identity(seq: &[u8], alleles: &[Allele], canonical_reverse: bool) -> Vec<Affinity> {
    let seq_rc = revcomp(seq);
    alleles.iter()
        .map(|allele| {
            let allele_seq = allele.sequence.as_bytes();
            let forward_identity = alignment_identity(seq, allele_seq);
            let reverse_identity = alignment_identity(&seq_rc, allele_seq);
            let reversed_wins = reverse_identity > forward_identity;
            let weight = forward_identity.max(reverse_identity);
            Affinity {
                consistent: weight >= 1.0,
                // flipping an already canonicalized walk lands back on forward
                is_reverse: canonical_reverse != reversed_wins,
                weight
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::graph::{Edge, Mapping, Node, NodeId};
    use std::collections::BTreeSet;

    /// 1 -> {2:G | 3:T} -> 4 and a site covering it.
    fn snp_graph() -> (VariationGraph, Site) {
        let mut graph = VariationGraph::new();
        for (id, seq) in [(1, "ACA"), (2, "G"), (3, "T"), (4, "CTC")] {
            graph.add_node(Node { id, sequence: seq.as_bytes().to_vec() }).unwrap();
        }
        for (from, to) in [(1, 2), (1, 3), (2, 4), (3, 4)] {
            graph.add_edge(Edge { from, from_start: false, to, to_end: false }).unwrap();
        }
        let contents: BTreeSet<NodeId> = [1, 2, 3, 4].into_iter().collect();
        let site = Site::new(NodeTraversal::new(1, false), NodeTraversal::new(4, false), contents);
        (graph, site)
    }

    fn test_alleles() -> Vec<Allele> {
        vec![
            Allele {
                traversal: vec![
                    NodeTraversal::new(1, false),
                    NodeTraversal::new(2, false),
                    NodeTraversal::new(4, false)
                ],
                sequence: "ACAGCTC".to_string()
            },
            Allele {
                traversal: vec![
                    NodeTraversal::new(1, false),
                    NodeTraversal::new(3, false),
                    NodeTraversal::new(4, false)
                ],
                sequence: "ACATCTC".to_string()
            }
        ]
    }

    fn make_read(graph: &mut VariationGraph, name: &str, nodes: &[NodeId], reversed: bool) -> Alignment {
        let mappings: Vec<Mapping> = if reversed {
            nodes.iter().rev()
                .map(|&id| Mapping::full(id, true, graph.node_seq(id).unwrap().len()))
                .collect()
        } else {
            nodes.iter()
                .map(|&id| Mapping::full(id, false, graph.node_seq(id).unwrap().len()))
                .collect()
        };
        graph.embed_path(name, mappings.clone()).unwrap();
        let mut sequence: Vec<u8> = vec![];
        for mapping in mappings.iter() {
            let node_seq = graph.node_seq(mapping.node_id).unwrap();
            if mapping.is_reverse {
                sequence.extend(revcomp(node_seq));
            } else {
                sequence.extend(node_seq);
            }
        }
        Alignment {
            name: name.to_string(),
            sequence,
            quality: vec![],
            mapping_quality: 60,
            path: mappings
        }
    }

    #[test]
    fn test_fast_exact_match() {
        let (mut graph, site) = snp_graph();
        let read = make_read(&mut graph, "r1", &[1, 2, 4], false);
        let mut reads_by_name: HashMap<String, Alignment> = Default::default();
        reads_by_name.insert(read.name.clone(), read);

        let affinities = compute_affinities(&graph, &reads_by_name, &site, &test_alleles(), false, 2).unwrap();
        let r1 = &affinities["r1"];
        assert_eq!(r1.len(), 2);
        assert!(r1[0].consistent && !r1[0].is_reverse);
        assert_eq!(r1[0].weight, 1.0);
        assert!(!r1[1].consistent);
        assert_eq!(r1[1].weight, 0.0);
    }

    #[test]
    fn test_fast_reverse_read() {
        let (mut graph, site) = snp_graph();
        let read = make_read(&mut graph, "r1", &[1, 3, 4], true);
        let mut reads_by_name: HashMap<String, Alignment> = Default::default();
        reads_by_name.insert(read.name.clone(), read);

        let affinities = compute_affinities(&graph, &reads_by_name, &site, &test_alleles(), false, 2).unwrap();
        let r1 = &affinities["r1"];
        assert!(!r1[0].consistent);
        assert!(r1[1].consistent);
        assert!(r1[1].is_reverse);
    }

    #[test]
    fn test_fast_prefix_suffix() {
        let (mut graph, site) = snp_graph();
        // spans start and the SNP node but not the end anchor
        let prefix_read = make_read(&mut graph, "pre", &[1, 2], false);
        // spans the SNP node and the end anchor only
        let suffix_read = make_read(&mut graph, "suf", &[3, 4], false);
        let mut reads_by_name: HashMap<String, Alignment> = Default::default();
        reads_by_name.insert(prefix_read.name.clone(), prefix_read);
        reads_by_name.insert(suffix_read.name.clone(), suffix_read);

        let affinities = compute_affinities(&graph, &reads_by_name, &site, &test_alleles(), false, 2).unwrap();
        let pre = &affinities["pre"];
        assert!(pre[0].consistent);
        assert!(!pre[1].consistent);
        let suf = &affinities["suf"];
        assert!(!suf[0].consistent);
        assert!(suf[1].consistent);
    }

    #[test]
    fn test_uninformative_read_dropped() {
        let (mut graph, site) = snp_graph();
        // touches only the start anchor: no information about the interior
        let read = make_read(&mut graph, "r1", &[1], false);
        let mut reads_by_name: HashMap<String, Alignment> = Default::default();
        reads_by_name.insert(read.name.clone(), read);

        let affinities = compute_affinities(&graph, &reads_by_name, &site, &test_alleles(), false, 2).unwrap();
        assert!(affinities.is_empty());
    }

    #[test]
    fn test_realign_identity() {
        let (mut graph, site) = snp_graph();
        let read = make_read(&mut graph, "r1", &[1, 2, 4], false);
        let mut reads_by_name: HashMap<String, Alignment> = Default::default();
        reads_by_name.insert(read.name.clone(), read);

        let affinities = compute_affinities(&graph, &reads_by_name, &site, &test_alleles(), true, 2).unwrap();
        let r1 = &affinities["r1"];
        assert!(r1[0].consistent);
        assert_eq!(r1[0].weight, 1.0);
        assert!(!r1[1].consistent);
        // one substitution over seven bases
        assert!((r1[1].weight - (6.0 / 7.0)).abs() < 1e-9);
    }
}
