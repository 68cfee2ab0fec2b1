
/// Read alignments embedded in the graph
pub mod alignment;
/// The bidirected sequence graph and its traversal primitives
pub mod graph;
/// Sites, alleles, affinities, and genotyped loci
pub mod locus;
