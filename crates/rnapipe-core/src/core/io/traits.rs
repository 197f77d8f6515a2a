use super::structure::{BackboneAtom, StructureError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Defines the interface for reading backbone coordinates from a structure file format.
///
/// Implementors parse only the first model of the file and return the backbone atoms
/// (`C3'` and `P`) in file order. Everything else in the file is ignored.
pub trait StructureFile {
    /// Reads the backbone atoms from a buffered reader.
    ///
    /// # Arguments
    ///
    /// * `reader` - The buffered reader to read from.
    ///
    /// # Return
    ///
    /// Returns the backbone atoms of the first model, in file order. The list may be empty.
    ///
    /// # Errors
    ///
    /// Returns an error if a coordinate record cannot be parsed or reading fails.
    fn read_backbone_from(reader: &mut impl BufRead) -> Result<Vec<BackboneAtom>, StructureError>;

    /// Reads the backbone atoms from a file path.
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the file to read.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or parsing fails.
    fn read_backbone_from_path<P: AsRef<Path>>(
        path: P,
    ) -> Result<Vec<BackboneAtom>, StructureError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_backbone_from(&mut reader)
    }
}
