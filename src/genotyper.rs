
use crate::affinity;
use crate::data_types::alignment::Alignment;
use crate::data_types::graph::{NodeTraversal, VariationGraph};
use crate::data_types::locus::{Affinity, Allele, Genotype, Locus, Site, Support};
use crate::math::{ln_prob_invert, multinomial_ln_pmf, phred_to_ln_prob, prob_to_ln_prob};
use crate::traversal_finder;

use log::{debug, warn};
use rustc_hash::FxHashMap as HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tuning knobs for the per-site pipeline. Defaults follow the CLI defaults.
#[derive(Clone, Debug)]
pub struct GenotyperConfig {
    /// bound on mappings walked per path occurrence during allele enumeration
    pub max_path_search_steps: usize,
    /// minimum walk observations to keep an allele
    pub min_recurrence: usize,
    /// per-site prior probability of heterozygosity
    pub het_prior: f64,
    /// Phred quality assumed for reads without base qualities
    pub default_base_quality: u8,
    /// fold mapping quality into the wrong-read probability
    pub use_mapq: bool,
    /// use identity realignment scoring instead of the fast rules
    pub realign: bool
}

impl Default for GenotyperConfig {
    fn default() -> GenotyperConfig {
        GenotyperConfig {
            max_path_search_steps: 100,
            min_recurrence: 2,
            het_prior: 0.001,
            default_base_quality: 15,
            use_mapq: false,
            realign: false
        }
    }
}

/// Per-read inputs to the likelihood model.
struct ReadEvidence {
    affinities: Vec<Affinity>,
    /// mean Phred quality of the read's in-site bases
    qual_score: f64,
    mapping_quality: u8
}

/// Extracts the base qualities a read spent inside the site, by walking its
/// mappings between site entry and exit and consuming read bases edit by
/// edit. Returns empty when the read's qualities run out, which signals that
/// base qualities are not really in use.
fn qualities_in_site(site: &Site, alignment: &Alignment) -> Vec<u8> {
    let mut collected: Vec<u8> = vec![];
    let mut in_site = false;
    let mut expected = NodeTraversal::new(0, false);
    let mut quality_pos: usize = 0;

    for mapping in alignment.path.iter() {
        let traversal = mapping.traversal();
        if !in_site {
            if traversal == site.start {
                in_site = true;
                expected = site.end;
            } else if traversal == site.end.reverse() {
                in_site = true;
                expected = site.start.reverse();
            }
        }

        for edit in mapping.edits.iter() {
            if in_site {
                for _ in 0..edit.to_length {
                    if quality_pos >= alignment.quality.len() {
                        return vec![];
                    }
                    collected.push(alignment.quality[quality_pos]);
                    quality_pos += 1;
                }
            } else {
                quality_pos += edit.to_length;
            }
        }

        if in_site && traversal == expected {
            in_site = false;
        }
    }

    collected
}

/// Mean in-site base quality for a read, falling back to the configured
/// default when the read carries no usable qualities.
fn read_qual_score(site: &Site, alignment: &Alignment, default_base_quality: u8) -> f64 {
    if alignment.quality.is_empty() {
        return default_base_quality as f64;
    }
    let site_quals = qualities_in_site(site, alignment);
    if site_quals.is_empty() {
        return default_base_quality as f64;
    }
    let total: f64 = site_quals.iter().map(|&q| q as f64).sum();
    (total / site_quals.len() as f64).round()
}

/// ln P(observed reads | genotype).
///
/// Reads consistent with neither genotype allele must be mismapped or
/// miscalled and contribute ln P(wrong); reads consistent with k >= 1 of the
/// two genotype slots contribute ln(k/2), a uniform draw among the matched
/// slots. Each distinct allele in the genotype additionally pays the log
/// multinomial of its strand split under a fair coin, penalizing strand bias.
fn genotype_ln_likelihood(
    genotype: [usize; 2],
    evidence: &[ReadEvidence],
    strand_support: &[Support],
    config: &GenotyperConfig
) -> f64 {
    let mut all_non_supporting_wrong = 0.0;
    let mut all_supporting_drawn = 0.0;

    for read in evidence.iter() {
        let consistent_slots = genotype.iter()
            .filter(|&&allele| read.affinities[allele].consistent)
            .count();
        if consistent_slots == 0 {
            let ln_base_wrong = phred_to_ln_prob(read.qual_score);
            let ln_wrong = if config.use_mapq {
                // P(wrong) = 1 - (1 - P_mq) * (1 - P_bq)
                let ln_mq_wrong = phred_to_ln_prob(read.mapping_quality as f64);
                ln_prob_invert(ln_prob_invert(ln_mq_wrong) + ln_prob_invert(ln_base_wrong))
            } else {
                ln_base_wrong
            };
            all_non_supporting_wrong += ln_wrong;
        } else {
            all_supporting_drawn += prob_to_ln_prob(consistent_slots as f64 / genotype.len() as f64);
        }
    }

    // strand balance, once per distinct allele in the genotype
    let mut strands_as_specified = 0.0;
    let mut distinct = genotype.to_vec();
    distinct.dedup();
    for allele in distinct {
        let support = strand_support[allele];
        strands_as_specified += multinomial_ln_pmf(&[0.5, 0.5], &[support.forward, support.reverse]);
    }

    all_non_supporting_wrong + all_supporting_drawn + strands_as_specified
}

/// ln P(genotype): `het_prior` for a het, its complement for a homozygote.
fn genotype_ln_prior(genotype: [usize; 2], het_prior: f64) -> f64 {
    if genotype[0] != genotype[1] {
        prob_to_ln_prob(het_prior)
    } else {
        ln_prob_invert(prob_to_ln_prob(het_prior))
    }
}

/// Scores every diploid genotype over the allele set and assembles the Locus:
/// per-allele strand supports, overall support with each read counted once,
/// and all genotypes sorted by descending posterior.
/// # Arguments
/// * `site` - the site being genotyped
/// * `alleles` - the candidate alleles
/// * `affinities` - per-read affinity vectors, parallel to `alleles`
/// * `reads_by_name` - the loaded reads, for quality lookups
/// * `config` - model tuning
pub fn genotype_site(
    site: &Site,
    alleles: Vec<Allele>,
    affinities: &HashMap<String, Vec<Affinity>>,
    reads_by_name: &HashMap<String, Alignment>,
    config: &GenotyperConfig
) -> Locus {
    let allele_count = alleles.len();
    let mut strand_support: Vec<Support> = vec![Default::default(); allele_count];
    let mut overall_support: Support = Default::default();
    let mut evidence: Vec<ReadEvidence> = Vec::with_capacity(affinities.len());

    for (name, read_affinities) in affinities.iter() {
        let read = &reads_by_name[name];

        let mut is_forward = false;
        let mut is_reverse = false;
        for (allele_index, affinity) in read_affinities.iter().enumerate() {
            if affinity.consistent {
                if affinity.is_reverse {
                    strand_support[allele_index].reverse += 1;
                    is_reverse = true;
                } else {
                    strand_support[allele_index].forward += 1;
                    is_forward = true;
                }
            }
        }

        if is_forward {
            if is_reverse {
                warn!("Read {:?} supports alleles as both forward and reverse, counting as forward", name);
            }
            overall_support.forward += 1;
        } else if is_reverse {
            overall_support.reverse += 1;
        } else if config.min_recurrence <= 1 {
            // nothing filtered out an allele this read could have matched
            warn!("Read {:?} supports no allele at site {}..{}", name, site.start, site.end);
        }

        evidence.push(ReadEvidence {
            affinities: read_affinities.clone(),
            qual_score: read_qual_score(site, read, config.default_base_quality),
            mapping_quality: read.mapping_quality
        });
    }

    let mut genotypes: Vec<Genotype> = vec![];
    for allele1 in 0..allele_count {
        for allele2 in 0..=allele1 {
            let genotype = [allele1, allele2];
            let log_likelihood = genotype_ln_likelihood(genotype, &evidence, &strand_support, config);
            let log_prior = genotype_ln_prior(genotype, config.het_prior);
            genotypes.push(Genotype {
                alleles: vec![allele1, allele2],
                log_likelihood,
                log_prior,
                log_posterior: log_likelihood + log_prior,
                phased: false
            });
        }
    }
    genotypes.sort_by(|a, b| b.log_posterior.partial_cmp(&a.log_posterior).unwrap());

    Locus {
        site: site.clone(),
        alleles,
        supports: strand_support,
        genotypes,
        overall_support
    }
}

/// Runs the full pipeline for one site: enumerate alleles (retrying a swapped
/// orientation when the site came out inside-out), score read affinities, and
/// genotype. Returns `None` when the site has no traversals either way.
/// # Arguments
/// * `graph` - the augmented graph, read-only
/// * `reads_by_name` - the loaded reads
/// * `site` - the site to solve
/// * `ref_path_index` - the designated reference path, if any
/// * `config` - model tuning
/// * `total_affinities` - shared counter of affinity records computed
pub fn solve_site(
    graph: &VariationGraph,
    reads_by_name: &HashMap<String, Alignment>,
    site: Site,
    ref_path_index: Option<usize>,
    config: &GenotyperConfig,
    total_affinities: &AtomicU64
) -> Result<Option<Locus>, Box<dyn std::error::Error>> {
    let mut site = site;
    let mut alleles = traversal_finder::paths_through_site(
        graph, &site, config.max_path_search_steps, config.min_recurrence, ref_path_index
    )?;

    if alleles.is_empty() {
        // the site finder can emit sites with swapped endpoints; flip and retry
        let swapped = Site::new(site.end, site.start, site.contents.clone());
        let swapped_alleles = traversal_finder::paths_through_site(
            graph, &swapped, config.max_path_search_steps, config.min_recurrence, ref_path_index
        )?;
        if !swapped_alleles.is_empty() {
            warn!("Corrected inside-out site {}..{}", swapped.start, swapped.end);
            site = swapped;
            alleles = swapped_alleles;
        }
    }

    if alleles.is_empty() {
        debug!("Site {}..{} has no alleles, skipping", site.start, site.end);
        return Ok(None);
    }
    debug!("Site {}..{} has {} alleles", site.start, site.end, alleles.len());

    let affinities = affinity::compute_affinities(
        graph, reads_by_name, &site, &alleles, config.realign, config.min_recurrence
    )?;
    let affinity_count: u64 = affinities.values().map(|v| v.len() as u64).sum();
    total_affinities.fetch_add(affinity_count, Ordering::Relaxed);

    Ok(Some(genotype_site(&site, alleles, &affinities, reads_by_name, config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::graph::{Edge, Mapping, Node, NodeId};
    use crate::math::ln_prob_to_phred;
    use std::collections::BTreeSet;

    /// 1 -> {2:G | 3:T} -> 4, the single-SNP bubble used throughout.
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

    /// Embeds a spanning read and registers it in the name map.
    fn add_read(
        graph: &mut VariationGraph,
        reads_by_name: &mut HashMap<String, Alignment>,
        name: &str,
        nodes: &[NodeId],
        qual: u8
    ) {
        let mappings: Vec<Mapping> = nodes.iter()
            .map(|&id| Mapping::full(id, false, graph.node_seq(id).unwrap().len()))
            .collect();
        graph.embed_path(name, mappings.clone()).unwrap();
        let mut sequence: Vec<u8> = vec![];
        for mapping in mappings.iter() {
            sequence.extend(graph.node_seq(mapping.node_id).unwrap());
        }
        let quality = if qual > 0 { vec![qual; sequence.len()] } else { vec![] };
        reads_by_name.insert(name.to_string(), Alignment {
            name: name.to_string(),
            sequence,
            quality,
            mapping_quality: 60,
            path: mappings
        });
    }

    fn snp_pileup(g_reads: usize, t_reads: usize, qual: u8) -> (VariationGraph, Site, HashMap<String, Alignment>) {
        let (mut graph, site) = snp_graph();
        let mut reads_by_name: HashMap<String, Alignment> = Default::default();
        for i in 0..g_reads {
            add_read(&mut graph, &mut reads_by_name, &format!("g{i}"), &[1, 2, 4], qual);
        }
        for i in 0..t_reads {
            add_read(&mut graph, &mut reads_by_name, &format!("t{i}"), &[1, 3, 4], qual);
        }
        (graph, site, reads_by_name)
    }

    fn solve(
        graph: &VariationGraph,
        site: &Site,
        reads_by_name: &HashMap<String, Alignment>,
        config: &GenotyperConfig
    ) -> Locus {
        let counter = AtomicU64::new(0);
        solve_site(graph, reads_by_name, site.clone(), None, config, &counter)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_snp_bubble_calls_het() {
        let (graph, site, reads_by_name) = snp_pileup(7, 3, 30);
        let config = GenotyperConfig { het_prior: 0.01, ..Default::default() };
        let locus = solve(&graph, &site, &reads_by_name, &config);

        assert_eq!(locus.alleles.len(), 2);
        assert_eq!(locus.alleles[0].sequence, "ACAGCTC");
        assert_eq!(locus.alleles[1].sequence, "ACATCTC");

        // supports: 7 forward G, 3 forward T, every read counted once overall
        assert_eq!(locus.supports[0], Support { forward: 7, reverse: 0 });
        assert_eq!(locus.supports[1], Support { forward: 3, reverse: 0 });
        assert_eq!(locus.overall_support, Support { forward: 10, reverse: 0 });

        // the het wins with these qualities and prior
        let best = &locus.genotypes[0];
        let mut called = best.alleles.clone();
        called.sort_unstable();
        assert_eq!(called, vec![0, 1]);

        // posteriors are sorted and decompose into likelihood + prior
        for pair in locus.genotypes.windows(2) {
            assert!(pair[0].log_posterior >= pair[1].log_posterior);
        }
        for genotype in locus.genotypes.iter() {
            assert!((genotype.log_posterior - (genotype.log_likelihood + genotype.log_prior)).abs() < 1e-12);
        }

        // Phred-normalized likelihoods: het at 0, hom-ref between, hom-alt worst
        let ll_of = |a: usize, b: usize| locus.genotypes.iter()
            .find(|g| {
                let mut alleles = g.alleles.clone();
                alleles.sort_unstable();
                alleles == vec![a.min(b), a.max(b)]
            })
            .unwrap()
            .log_likelihood;
        let best_ll = ll_of(0, 1);
        let pl_hom_ref = ln_prob_to_phred(ll_of(0, 0) - best_ll);
        let pl_hom_alt = ln_prob_to_phred(ll_of(1, 1) - best_ll);
        assert!(pl_hom_ref > 0.0);
        assert!(pl_hom_alt > pl_hom_ref);
    }

    #[test]
    fn test_hom_call_when_unanimous() {
        let (graph, site, reads_by_name) = snp_pileup(10, 0, 30);
        let config = GenotyperConfig { min_recurrence: 1, het_prior: 0.01, ..Default::default() };
        let locus = solve(&graph, &site, &reads_by_name, &config);
        // only the G allele is observed, and the homozygote wins
        assert_eq!(locus.alleles.len(), 1);
        let best = &locus.genotypes[0];
        assert_eq!(best.alleles, vec![0, 0]);
    }

    #[test]
    fn test_min_recurrence_drops_singleton() {
        let (graph, site, reads_by_name) = snp_pileup(5, 1, 30);
        let config = GenotyperConfig { min_recurrence: 2, het_prior: 0.01, ..Default::default() };
        let locus = solve(&graph, &site, &reads_by_name, &config);
        // the singleton T allele is gone; the call is homozygous
        assert_eq!(locus.alleles.len(), 1);
        assert_eq!(locus.genotypes[0].alleles, vec![0, 0]);
    }

    #[test]
    fn test_inside_out_site_matches_correct_orientation() {
        let (graph, site, reads_by_name) = snp_pileup(4, 4, 30);
        let config = GenotyperConfig { het_prior: 0.01, ..Default::default() };

        let straight = solve(&graph, &site, &reads_by_name, &config);
        let inside_out = Site::new(site.end, site.start, site.contents.clone());
        let corrected = solve(&graph, &inside_out, &reads_by_name, &config);
        assert_eq!(straight, corrected);
    }

    #[test]
    fn test_default_quality_wrong_read_term() {
        // no base qualities anywhere: two G reads keep the G allele, the lone
        // T read is dropped by recurrence and becomes inconsistent evidence
        let (graph, site, reads_by_name) = snp_pileup(2, 1, 0);
        let config = GenotyperConfig { min_recurrence: 2, ..Default::default() };
        let locus = solve(&graph, &site, &reads_by_name, &config);

        assert_eq!(locus.alleles.len(), 1);
        let hom = &locus.genotypes[0];
        assert_eq!(hom.alleles, vec![0, 0]);
        // two consistent reads contribute ln(2/2) = 0 each; the inconsistent
        // read pays ln(phred_to_prob(default_base_quality)) exactly once; the
        // allele's strand term is multinomial of (2, 0)
        let expected = phred_to_ln_prob(config.default_base_quality as f64)
            + multinomial_ln_pmf(&[0.5, 0.5], &[2, 0]);
        assert!((hom.log_likelihood - expected).abs() < 1e-9);
    }

    #[test]
    fn test_strand_bias_penalty() {
        // hand-built evidence: twenty reads supporting allele 0, all reverse
        let affinity = |consistent: bool, is_reverse: bool| Affinity {
            consistent,
            is_reverse,
            weight: if consistent { 1.0 } else { 0.0 }
        };
        let config = GenotyperConfig::default();

        let skewed_evidence: Vec<ReadEvidence> = (0..20)
            .map(|_| ReadEvidence {
                affinities: vec![affinity(true, true)],
                qual_score: 30.0,
                mapping_quality: 60
            })
            .collect();
        let skewed_support = vec![Support { forward: 0, reverse: 20 }];
        let skewed_ll = genotype_ln_likelihood([0, 0], &skewed_evidence, &skewed_support, &config);

        let balanced_evidence: Vec<ReadEvidence> = (0..20)
            .map(|i| ReadEvidence {
                affinities: vec![affinity(true, i % 2 == 0)],
                qual_score: 30.0,
                mapping_quality: 60
            })
            .collect();
        let balanced_support = vec![Support { forward: 10, reverse: 10 }];
        let balanced_ll = genotype_ln_likelihood([0, 0], &balanced_evidence, &balanced_support, &config);

        // the all-reverse pileup sits ~13.86 nats below a coin-flip certainty
        let skewed_strand_term = multinomial_ln_pmf(&[0.5, 0.5], &[0, 20]);
        assert!((skewed_strand_term - 20.0 * 0.5_f64.ln()).abs() < 1e-9);
        let expected_gap = multinomial_ln_pmf(&[0.5, 0.5], &[10, 10]) - skewed_strand_term;
        assert!(expected_gap > 0.0);
        assert!(((balanced_ll - skewed_ll) - expected_gap).abs() < 1e-9);
    }

    #[test]
    fn test_strand_term_applied_once_for_homozygote() {
        // a het (0,1) and hom (0,0) over the same evidence: the hom must pay
        // the allele-0 strand term exactly once
        let evidence: Vec<ReadEvidence> = (0..6)
            .map(|_| ReadEvidence {
                affinities: vec![
                    Affinity { consistent: true, is_reverse: false, weight: 1.0 },
                    Affinity { consistent: false, is_reverse: false, weight: 0.0 }
                ],
                qual_score: 30.0,
                mapping_quality: 60
            })
            .collect();
        let support = vec![Support { forward: 6, reverse: 0 }, Support::default()];
        let config = GenotyperConfig::default();

        let hom_ll = genotype_ln_likelihood([0, 0], &evidence, &support, &config);
        // all reads consistent with both slots: ln(2/2) = 0 per read, so the
        // likelihood is exactly one strand term
        let one_strand_term = multinomial_ln_pmf(&[0.5, 0.5], &[6, 0]);
        assert!((hom_ll - one_strand_term).abs() < 1e-9);
    }

    #[test]
    fn test_qualities_in_site() {
        let (mut graph, site) = snp_graph();
        let mut reads_by_name: HashMap<String, Alignment> = Default::default();
        add_read(&mut graph, &mut reads_by_name, "r1", &[1, 2, 4], 20);
        let read = &reads_by_name["r1"];
        // the whole read is inside the site
        assert_eq!(qualities_in_site(&site, read).len(), read.sequence.len());
        assert_eq!(read_qual_score(&site, read, 15), 20.0);

        // a read with no qualities falls back to the default
        let mut bare = read.clone();
        bare.quality = vec![];
        assert_eq!(read_qual_score(&site, &bare, 15), 15.0);
    }
}
