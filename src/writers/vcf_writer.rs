
use crate::data_types::graph::VariationGraph;
use crate::data_types::locus::{Locus, Support};
use crate::math::ln_prob_to_phred;
use crate::reference_index::ReferenceIndex;

use log::{debug, warn};
use std::io::Write;

/// Phred value reported for genotypes that were never scored, which happens
/// when the reference allele was not among the locus alleles.
const UNSCORED_PL: i64 = 9999;

/// Renders genotyped loci as VCF text records against a reference index.
/// Records for sites whose endpoints are off the reference are suppressed.
pub struct VcfWriter<W: Write> {
    writer: W,
    sample_name: String,
    contig_name: String,
    variant_offset: i64
}

impl<W: Write> VcfWriter<W> {
    /// Creates the writer and emits the VCF header.
    /// # Arguments
    /// * `writer` - the output stream
    /// * `reference` - the reference index records are placed against
    /// * `sample_name` - the single sample column name
    /// * `contig_name` - overrides the reference path name in output when set
    /// * `variant_offset` - added to every reported position
    /// # Errors
    /// * on any write failure
    pub fn new(
        mut writer: W,
        reference: &ReferenceIndex,
        sample_name: &str,
        contig_name: Option<&str>,
        variant_offset: i64
    ) -> Result<VcfWriter<W>, Box<dyn std::error::Error>> {
        let contig_name = contig_name.unwrap_or_else(|| reference.path_name()).to_string();
        writeln!(writer, "##fileformat=VCFv4.2")?;
        writeln!(writer, "##ALT=<ID=NON_REF,Description=\"Represents any possible alternative allele at this location\">")?;
        writeln!(writer, "##INFO=<ID=XREF,Number=0,Type=Flag,Description=\"Present in original graph\">")?;
        writeln!(writer, "##INFO=<ID=XSEE,Number=.,Type=String,Description=\"Original graph node:offset cross-references\">")?;
        writeln!(writer, "##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total Depth\">")?;
        writeln!(writer, "##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Read Depth\">")?;
        writeln!(writer, "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">")?;
        writeln!(writer, "##FORMAT=<ID=AD,Number=.,Type=Integer,Description=\"Allelic depths for the ref and alt alleles in the order listed\">")?;
        writeln!(writer, "##FORMAT=<ID=SB,Number=4,Type=Integer,Description=\"Forward and reverse support for ref and alt alleles.\">")?;
        writeln!(writer, "##FORMAT=<ID=XAAD,Number=1,Type=Integer,Description=\"Alt allele read count.\">")?;
        writeln!(writer, "##FORMAT=<ID=PL,Number=G,Type=Integer,Description=\"Phred-scaled genotype likelihoods, normalized to the best genotype\">")?;
        writeln!(writer, "##contig=<ID={},length={}>", contig_name, reference.len())?;
        writeln!(writer, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{}", sample_name)?;
        Ok(VcfWriter {
            writer,
            sample_name: sample_name.to_string(),
            contig_name,
            variant_offset
        })
    }

    /// Flushes the underlying stream.
    pub fn flush(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.writer.flush()?;
        Ok(())
    }

    /// Renders one locus as zero or one VCF record.
    /// # Arguments
    /// * `graph` - the graph, for spelling allele interiors
    /// * `reference` - the reference index
    /// * `locus` - the genotyped locus
    /// # Errors
    /// * on write failures or graph lookups that should not fail
    pub fn write_locus(
        &mut self,
        graph: &VariationGraph,
        reference: &ReferenceIndex,
        locus: &Locus
    ) -> Result<(), Box<dyn std::error::Error>> {
        if locus.alleles.is_empty() || locus.genotypes.is_empty() {
            warn!("Locus at {}..{} has no alleles, no record emitted", locus.site.start, locus.site.end);
            return Ok(());
        }

        let first_id = locus.site.start.node;
        let last_id = locus.site.end.node;
        let (start_visit, end_visit) = match (reference.first_visit(first_id), reference.first_visit(last_id)) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                debug!("Site {}..{} endpoints not on reference, no record emitted", locus.site.start, locus.site.end);
                return Ok(());
            }
        };

        // the bubble interior spans from past the end of the start node up to
        // the beginning of the end node
        let mut interval_start = start_visit.0 + graph.node_seq(first_id)?.len();
        let interval_end = end_visit.0;
        if interval_start > interval_end {
            warn!("Site {}..{} runs backward along the reference, no record emitted", locus.site.start, locus.site.end);
            return Ok(());
        }

        let mut ref_string = normalize_bases(reference.substring(interval_start, interval_end));

        // spell each allele's interior, dropping the anchor nodes
        let mut allele_strings: Vec<String> = Vec::with_capacity(locus.alleles.len());
        for allele in locus.alleles.iter() {
            let mut spelled: Vec<u8> = vec![];
            let interior_len = allele.traversal.len().saturating_sub(2);
            for t in allele.traversal.iter().skip(1).take(interior_len) {
                spelled.extend(graph.traversal_seq(*t)?);
            }
            allele_strings.push(normalize_bases(&spelled));
        }

        // the standard left-anchor convention for empty alleles
        if ref_string.is_empty() || allele_strings.iter().any(|a| a.is_empty()) {
            if interval_start == 0 {
                warn!("Cannot left-anchor a variant at reference offset 0, no record emitted");
                return Ok(());
            }
            interval_start -= 1;
            let prefix = normalize_bases(reference.substring(interval_start, interval_start + 1));
            ref_string = format!("{}{}", prefix, ref_string);
            for allele in allele_strings.iter_mut() {
                *allele = format!("{}{}", prefix, allele);
            }
        }

        // assign VCF allele numbers, deduplicating against the reference and
        // each other
        let mut vcf_alleles: Vec<String> = vec![ref_string.clone()];
        let mut allele_to_alt: Vec<usize> = Vec::with_capacity(allele_strings.len());
        for allele in allele_strings.iter() {
            let alt_number = match vcf_alleles.iter().position(|existing| existing == allele) {
                Some(existing) => existing,
                None => {
                    vcf_alleles.push(allele.clone());
                    vcf_alleles.len() - 1
                }
            };
            allele_to_alt.push(alt_number);
        }
        let max_alt_number = allele_to_alt.iter().copied().max().unwrap_or(0);

        // supports shuffled into VCF alt numbering
        let mut support_by_alt: Vec<Support> = vec![Default::default(); max_alt_number + 1];
        for (allele_index, &alt_number) in allele_to_alt.iter().enumerate() {
            if allele_index < locus.supports.len() {
                support_by_alt[alt_number].forward += locus.supports[allele_index].forward;
                support_by_alt[alt_number].reverse += locus.supports[allele_index].reverse;
            }
        }

        let best = &locus.genotypes[0];
        let mut gt_alts = [allele_to_alt[best.alleles[0]], allele_to_alt[best.alleles[1]]];
        gt_alts.sort_unstable();
        let separator = if best.phased { "|" } else { "/" };
        let gt_string = format!("{}{}{}", gt_alts[0], separator, gt_alts[1]);

        let depth = locus.overall_support.total();
        let ad_string = support_by_alt.iter()
            .map(|s| s.total().to_string())
            .collect::<Vec<String>>()
            .join(",");

        // SB: reference strand counts, then the combined alt strand counts
        let alt_forward: u64 = support_by_alt.iter().skip(1).map(|s| s.forward).sum();
        let alt_reverse: u64 = support_by_alt.iter().skip(1).map(|s| s.reverse).sum();
        let sb_string = format!(
            "{},{},{},{}",
            support_by_alt[0].forward, support_by_alt[0].reverse, alt_forward, alt_reverse
        );
        let alt_depth: u64 = support_by_alt.iter().skip(1).map(|s| s.total()).sum();

        // PL in canonical ordering, normalized against the best genotype
        let pl_len = (max_alt_number * (max_alt_number + 1)) / 2 + max_alt_number + 1;
        let mut pl_values: Vec<i64> = vec![UNSCORED_PL; pl_len];
        for genotype in locus.genotypes.iter() {
            let mut pair = [allele_to_alt[genotype.alleles[0]], allele_to_alt[genotype.alleles[1]]];
            pair.sort_unstable();
            let (low_alt, high_alt) = (pair[0], pair[1]);
            let index = (high_alt * (high_alt + 1)) / 2 + low_alt;
            let pl = ln_prob_to_phred(genotype.log_likelihood - best.log_likelihood)
                .round()
                .max(0.0) as i64;
            // distinct locus alleles can collapse onto one alt; keep the best
            pl_values[index] = pl_values[index].min(pl);
        }
        let pl_string = pl_values.iter()
            .map(|pl| pl.to_string())
            .collect::<Vec<String>>()
            .join(",");

        let alt_string = if vcf_alleles.len() > 1 {
            vcf_alleles[1..].join(",")
        } else {
            ".".to_string()
        };
        let position = interval_start as i64 + 1 + self.variant_offset;

        writeln!(
            self.writer,
            "{}\t{}\t.\t{}\t{}\t0\t.\tDP={}\tGT:DP:AD:SB:XAAD:PL\t{}:{}:{}:{}:{}:{}",
            self.contig_name, position, ref_string, alt_string, depth,
            gt_string, depth, ad_string, sb_string, alt_depth, pl_string
        )?;
        Ok(())
    }
}

/// Replaces anything outside A/C/G/T with N, as record alleles require.
fn normalize_bases(seq: &[u8]) -> String {
    seq.iter()
        .map(|&b| match b {
            b'A' | b'C' | b'G' | b'T' => b as char,
            _ => 'N'
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::graph::{Edge, Mapping, Node, NodeTraversal};
    use crate::data_types::locus::{Allele, Genotype, Site};
    use std::collections::BTreeSet;

    /// 1:ACA -> {2:G | 3:T} -> 4:CTC with the reference running through G.
    fn snp_setup() -> (VariationGraph, ReferenceIndex) {
        let mut graph = VariationGraph::new();
        for (id, seq) in [(1, "ACA"), (2, "G"), (3, "T"), (4, "CTC")] {
            graph.add_node(Node { id, sequence: seq.as_bytes().to_vec() }).unwrap();
        }
        for (from, to) in [(1, 2), (1, 3), (2, 4), (3, 4)] {
            graph.add_edge(Edge { from, from_start: false, to, to_end: false }).unwrap();
        }
        graph.embed_path("ref", vec![
            Mapping::full(1, false, 3),
            Mapping::full(2, false, 1),
            Mapping::full(4, false, 3)
        ]).unwrap();
        let reference = ReferenceIndex::new(&graph, "ref").unwrap();
        (graph, reference)
    }

    fn traversal(nodes: &[u64]) -> Vec<NodeTraversal> {
        nodes.iter().map(|&id| NodeTraversal::new(id, false)).collect()
    }

    fn genotype(alleles: [usize; 2], ll: f64, prior: f64) -> Genotype {
        Genotype {
            alleles: alleles.to_vec(),
            log_likelihood: ll,
            log_prior: prior,
            log_posterior: ll + prior,
            phased: false
        }
    }

    fn snp_locus() -> Locus {
        let contents: BTreeSet<u64> = [1, 2, 3, 4].into_iter().collect();
        Locus {
            site: Site::new(NodeTraversal::new(1, false), NodeTraversal::new(4, false), contents),
            alleles: vec![
                Allele { traversal: traversal(&[1, 2, 4]), sequence: "ACAGCTC".to_string() },
                Allele { traversal: traversal(&[1, 3, 4]), sequence: "ACATCTC".to_string() }
            ],
            supports: vec![
                Support { forward: 4, reverse: 3 },
                Support { forward: 2, reverse: 1 }
            ],
            genotypes: vec![
                genotype([1, 0], -10.0, -4.6),
                genotype([0, 0], -15.0, -0.01),
                genotype([1, 1], -30.0, -0.01)
            ],
            overall_support: Support { forward: 6, reverse: 4 }
        }
    }

    fn render(locus: &Locus) -> String {
        let (graph, reference) = snp_setup();
        let mut writer = VcfWriter::new(vec![], &reference, "SAMPLE", None, 0).unwrap();
        writer.write_locus(&graph, &reference, locus).unwrap();
        String::from_utf8(writer.writer).unwrap()
    }

    #[test]
    fn test_header() {
        let (_graph, reference) = snp_setup();
        let writer = VcfWriter::new(vec![], &reference, "sample1", Some("chr1"), 0).unwrap();
        let header = String::from_utf8(writer.writer).unwrap();
        assert!(header.starts_with("##fileformat=VCFv4.2\n"));
        assert!(header.contains("##ALT=<ID=NON_REF"));
        assert!(header.contains("##INFO=<ID=XREF"));
        assert!(header.contains("##INFO=<ID=XSEE"));
        assert!(header.contains("##contig=<ID=chr1,length=7>"));
        assert!(header.ends_with("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tsample1\n"));
    }

    #[test]
    fn test_snp_record() {
        let output = render(&snp_locus());
        let record = output.lines().last().unwrap();
        let fields: Vec<&str> = record.split('\t').collect();
        // interval is [3, 4): the G between the anchors
        assert_eq!(fields[0], "ref");
        assert_eq!(fields[1], "4");
        assert_eq!(fields[3], "G");
        assert_eq!(fields[4], "T");
        assert_eq!(fields[7], "DP=10");
        assert_eq!(fields[8], "GT:DP:AD:SB:XAAD:PL");
        let sample: Vec<&str> = fields[9].split(':').collect();
        assert_eq!(sample[0], "0/1");
        assert_eq!(sample[1], "10");
        assert_eq!(sample[2], "7,3");
        assert_eq!(sample[3], "4,3,2,1");
        assert_eq!(sample[4], "3");
        // PL ordering 0/0, 0/1, 1/1 normalized against the best likelihood
        let expected_hom_ref = ln_prob_to_phred(-15.0 - -10.0).round() as i64;
        let expected_hom_alt = ln_prob_to_phred(-30.0 - -10.0).round() as i64;
        assert_eq!(sample[5], format!("{},0,{}", expected_hom_ref, expected_hom_alt));
    }

    #[test]
    fn test_variant_offset() {
        let (graph, reference) = snp_setup();
        let mut writer = VcfWriter::new(vec![], &reference, "SAMPLE", None, 1000).unwrap();
        writer.write_locus(&graph, &reference, &snp_locus()).unwrap();
        let output = String::from_utf8(writer.writer).unwrap();
        let record = output.lines().last().unwrap();
        assert_eq!(record.split('\t').nth(1).unwrap(), "1004");
    }

    #[test]
    fn test_left_anchored_deletion() {
        // deletion allele traverses straight from the start anchor to the end
        // anchor; its interior is empty and forces the left-anchor convention
        let contents: BTreeSet<u64> = [1, 2, 4].into_iter().collect();
        let locus = Locus {
            site: Site::new(NodeTraversal::new(1, false), NodeTraversal::new(4, false), contents),
            alleles: vec![
                Allele { traversal: traversal(&[1, 2, 4]), sequence: "ACAGCTC".to_string() },
                Allele { traversal: traversal(&[1, 4]), sequence: "ACACTC".to_string() }
            ],
            supports: vec![
                Support { forward: 3, reverse: 3 },
                Support { forward: 2, reverse: 2 }
            ],
            genotypes: vec![
                genotype([1, 0], -8.0, -4.6),
                genotype([0, 0], -12.0, -0.01),
                genotype([1, 1], -20.0, -0.01)
            ],
            overall_support: Support { forward: 5, reverse: 5 }
        };
        let output = render(&locus);
        let record = output.lines().last().unwrap();
        let fields: Vec<&str> = record.split('\t').collect();
        // position steps back one base to cover the anchor
        assert_eq!(fields[1], "3");
        assert_eq!(fields[3], "AG");
        assert_eq!(fields[4], "A");
    }

    #[test]
    fn test_off_reference_site_is_suppressed() {
        // site end sits on node 3, which the reference path never visits
        let contents: BTreeSet<u64> = [1, 3].into_iter().collect();
        let locus = Locus {
            site: Site::new(NodeTraversal::new(1, false), NodeTraversal::new(3, false), contents),
            alleles: vec![
                Allele { traversal: traversal(&[1, 3]), sequence: "ACAT".to_string() }
            ],
            supports: vec![Support { forward: 1, reverse: 1 }],
            genotypes: vec![genotype([0, 0], -1.0, -0.01)],
            overall_support: Support { forward: 1, reverse: 1 }
        };
        let output = render(&locus);
        // header only, no record
        assert!(output.lines().last().unwrap().starts_with("#CHROM"));
    }
}
