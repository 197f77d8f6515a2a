/// A single record of a FASTA file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    /// The header line without the leading `>`.
    pub header: String,
    /// The sequence, uppercased, with line breaks removed.
    pub sequence: String,
}

impl FastaRecord {
    pub fn new(header: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            sequence: sequence.into(),
        }
    }

    /// The record identifier: the first whitespace-delimited token of the header.
    pub fn id(&self) -> &str {
        self.header.split_whitespace().next().unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Percentage of G and C nucleotides; `None` for an empty sequence.
    pub fn gc_content(&self) -> Option<f64> {
        if self.sequence.is_empty() {
            return None;
        }
        let gc = self
            .sequence
            .chars()
            .filter(|c| matches!(c, 'G' | 'C'))
            .count();
        Some(gc as f64 / self.sequence.len() as f64 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_first_header_token() {
        let r = FastaRecord::new("query_1 some description", "ACGU");
        assert_eq!(r.id(), "query_1");
    }

    #[test]
    fn gc_content_counts_g_and_c() {
        let r = FastaRecord::new("q", "GGCCAAUU");
        assert_eq!(r.gc_content(), Some(50.0));
        assert_eq!(FastaRecord::new("q", "").gc_content(), None);
    }
}
