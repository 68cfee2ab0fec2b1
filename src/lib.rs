
/// Read-to-allele consistency scoring
pub mod affinity;
/// Cactus bubble tree site finder rooted at the reference path
pub mod bubble_tree;
/// CLI functionality and checks
pub mod cli;
/// Contains multiple wrappers for useful data types in graphcall
pub mod data_types;
/// Organizes the per-site workflow: allele enumeration, affinity scoring, and diploid genotyping
pub mod genotyper;
/// Components for loading the graph and read alignments from their JSON formats
pub mod graph_io;
/// Log-space probability helpers for the genotype model
pub mod math;
/// Linearization of the reference path for record output
pub mod reference_index;
/// Basic helpful utilities for pairwise sequence alignment
pub mod sequence_alignment;
/// Superbubble site finder: unfold, dagify, and decompose
pub mod site_finder;
/// Per-site allele enumeration from embedded paths
pub mod traversal_finder;
/// Contains all the various output writer functionality
pub mod writers;
