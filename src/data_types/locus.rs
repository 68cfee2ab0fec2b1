
use crate::data_types::graph::{NodeId, NodeTraversal};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A local variant site: a contiguous subgraph bounded by two oriented nodes,
/// such that maximal traversals entering through `start` and exiting through
/// `end` stay within `contents`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Site {
    /// the oriented entry node, contained in `contents`
    pub start: NodeTraversal,
    /// the oriented exit node, contained in `contents`
    pub end: NodeTraversal,
    /// every node id inside the site, endpoints included
    pub contents: BTreeSet<NodeId>
}

impl Site {
    pub fn new(start: NodeTraversal, end: NodeTraversal, contents: BTreeSet<NodeId>) -> Site {
        debug_assert!(contents.contains(&start.node));
        debug_assert!(contents.contains(&end.node));
        Site { start, end, contents }
    }
}

/// A realized traversal of a site together with the sequence it spells.
/// The traversal begins with `site.start` and ends with `site.end`; the
/// sequence includes the endpoint nodes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Allele {
    pub traversal: Vec<NodeTraversal>,
    pub sequence: String
}

/// Consistency of one read with one allele.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Affinity {
    /// does the read's site sequence agree with the allele
    pub consistent: bool,
    /// did the read traverse the site on the reverse strand
    pub is_reverse: bool,
    /// scoring weight in [0, 1]; 0/1 in fast mode, alignment identity in realign mode
    pub weight: f64
}

/// Strand-split read support counts.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Support {
    pub forward: u64,
    pub reverse: u64
}

impl Support {
    pub fn total(&self) -> u64 {
        self.forward + self.reverse
    }
}

/// A diploid genotype candidate: two allele indices into the locus allele
/// list, with its scoring terms. `log_posterior = log_likelihood + log_prior`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Genotype {
    /// the two allele indices, stored high-then-low
    pub alleles: Vec<usize>,
    pub log_likelihood: f64,
    pub log_prior: f64,
    pub log_posterior: f64,
    /// always false here; kept so record rendering can pick "/" vs "|"
    pub phased: bool
}

impl Genotype {
    pub fn is_het(&self) -> bool {
        self.alleles[0] != self.alleles[1]
    }
}

/// The genotyping result for one site: the candidate alleles, per-allele and
/// overall strand supports, and all genotypes sorted by descending posterior.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Locus {
    pub site: Site,
    pub alleles: Vec<Allele>,
    /// one entry per allele, parallel to `alleles`
    pub supports: Vec<Support>,
    /// sorted by descending log posterior; the first entry is the call
    pub genotypes: Vec<Genotype>,
    /// each read counted at most once (forward wins ties)
    pub overall_support: Support
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_total() {
        let support = Support { forward: 3, reverse: 4 };
        assert_eq!(support.total(), 7);
    }

    #[test]
    fn test_genotype_is_het() {
        let base = Genotype {
            alleles: vec![1, 0],
            log_likelihood: -1.0,
            log_prior: -0.1,
            log_posterior: -1.1,
            phased: false
        };
        assert!(base.is_het());
        let hom = Genotype { alleles: vec![1, 1], ..base };
        assert!(!hom.is_het());
    }
}
