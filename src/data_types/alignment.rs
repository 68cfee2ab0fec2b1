
use crate::data_types::graph::Mapping;

/// A read threaded through the augmented graph: its embedded path plus the
/// original sequence, base qualities, and mapping quality.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Alignment {
    /// unique read name; also the name of its embedded path
    pub name: String,
    /// the original read sequence
    pub sequence: Vec<u8>,
    /// per-base Phred qualities; empty when the source had none
    pub quality: Vec<u8>,
    /// mapping quality, Phred scaled
    pub mapping_quality: u8,
    /// the read's walk through the augmented graph
    pub path: Vec<Mapping>
}

impl Alignment {
    /// True when base qualities were provided for every base.
    pub fn has_quality(&self) -> bool {
        !self.quality.is_empty() && self.quality.len() == self.sequence.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::graph::Mapping;

    #[test]
    fn test_has_quality() {
        let mut alignment = Alignment {
            name: "r1".to_string(),
            sequence: b"ACGT".to_vec(),
            quality: vec![],
            mapping_quality: 60,
            path: vec![Mapping::full(1, false, 4)]
        };
        assert!(!alignment.has_quality());
        alignment.quality = vec![30; 4];
        assert!(alignment.has_quality());
        alignment.quality = vec![30; 3];
        assert!(!alignment.has_quality());
    }
}
