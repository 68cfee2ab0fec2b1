
use crate::data_types::graph::{NodeTraversal, VariationGraph};
use crate::data_types::locus::{Allele, Site};

use log::trace;
use rustc_hash::FxHashSet as HashSet;
use std::collections::BTreeMap;

/// Bookkeeping for one deduplicated allele sequence.
struct CandidateTraversal {
    traversal: Vec<NodeTraversal>,
    count: usize,
    on_reference: bool
}

/// Enumerates the distinct alleles of a site realized by embedded paths.
///
/// Every path touching both endpoint nodes is walked from each of its
/// occurrences on `site.start.node`, in the direction that agrees with the
/// site orientation, until it reaches `site.end.node` in the expected
/// orientation or exceeds the step bound. Walks are deduplicated by the
/// sequence they spell; a sequence observed by at least `min_recurrence`
/// walks becomes an allele. A walk contributed by the reference path is kept
/// regardless of recurrence, so the reference allele is never elided.
/// # Arguments
/// * `graph` - the augmented graph with embedded paths
/// * `site` - the site to traverse
/// * `max_path_search_steps` - bound on mappings walked per occurrence
/// * `min_recurrence` - minimum observations to keep an allele
/// * `ref_path_index` - the reference path's index, if one is designated
pub fn paths_through_site(
    graph: &VariationGraph,
    site: &Site,
    max_path_search_steps: usize,
    min_recurrence: usize,
    ref_path_index: Option<usize>
) -> Result<Vec<Allele>, Box<dyn std::error::Error>> {
    // dedup on spelled sequence; ordered so emission is deterministic
    let mut results: BTreeMap<Vec<u8>, CandidateTraversal> = BTreeMap::new();

    if !graph.has_node_mapping(site.start.node) || !graph.has_node_mapping(site.end.node) {
        return Ok(vec![]);
    }

    let end_paths: HashSet<usize> = graph.paths_touching_node(site.end.node).into_iter().collect();

    for &start_step in graph.occurrences_on_node(site.start.node) {
        if !end_paths.contains(&start_step.path_index) {
            // this path never reaches the far end of the site
            continue;
        }

        let start_mapping = graph.mapping_at(start_step);
        // walk left when exactly one of the site orientation and the mapping
        // strand is flipped, otherwise walk right
        let go_left = start_mapping.is_reverse != site.start.backward;
        // and when walking against the path, the end node should appear in
        // the opposite of its site orientation
        let expected_end_reverse = site.end.backward != go_left;

        let mut step = Some(start_step);
        let mut steps_taken: usize = 0;
        let mut traversal: Vec<NodeTraversal> = vec![];
        let mut allele_seq: Vec<u8> = vec![];

        while let Some(current) = step {
            if steps_taken >= max_path_search_steps {
                break;
            }
            let mapping = graph.mapping_at(current);
            let visit = NodeTraversal::new(mapping.node_id, mapping.is_reverse != go_left);
            allele_seq.extend(graph.traversal_seq(visit)?);
            traversal.push(visit);

            if mapping.node_id == site.end.node && mapping.is_reverse == expected_end_reverse {
                let on_reference = Some(current.path_index) == ref_path_index;
                trace!(
                    "site {}..{}: path {:?} spells {:?}",
                    site.start, site.end,
                    graph.path_name(current.path_index),
                    String::from_utf8_lossy(&allele_seq)
                );
                results.entry(allele_seq)
                    .and_modify(|c| {
                        c.count += 1;
                        c.on_reference |= on_reference;
                    })
                    .or_insert(CandidateTraversal { traversal, count: 1, on_reference });
                break;
            }

            step = if go_left {
                graph.traverse_left(current)
            } else {
                graph.traverse_right(current)
            };
            steps_taken += 1;
        }
    }

    let alleles: Vec<Allele> = results.into_iter()
        .filter(|(_seq, candidate)| candidate.count >= min_recurrence || candidate.on_reference)
        .map(|(seq, candidate)| Allele {
            traversal: candidate.traversal,
            sequence: String::from_utf8_lossy(&seq).into_owned()
        })
        .collect();
    Ok(alleles)
}
