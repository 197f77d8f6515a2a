use super::traits::StructureFile;
use nalgebra::Point3;
use std::collections::HashSet;
use std::fmt;
use std::io::{self, BufRead};
use std::path::Path;
use thiserror::Error;

/// Atom names that make up the nucleic-acid backbone trace used for structural comparison.
pub const BACKBONE_ATOM_NAMES: [&str; 2] = ["C3'", "P"];

#[derive(Debug, Error)]
pub enum StructureError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {kind}")]
    Parse {
        line: usize,
        kind: StructureParseErrorKind,
    },
    #[error("Missing required mmCIF column: _atom_site.{0}")]
    MissingColumn(&'static str),
}

#[derive(Debug, Error)]
pub enum StructureParseErrorKind {
    #[error("Invalid integer in {field} (value: '{value}')")]
    InvalidInt { field: &'static str, value: String },
    #[error("Invalid float in {field} (value: '{value}')")]
    InvalidFloat { field: &'static str, value: String },
    #[error("Line is too short for an ATOM/HETATM record (must be at least 54 chars)")]
    LineTooShort,
}

/// Identity of an atom independent of its position in the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomKey {
    pub chain: String,
    pub residue_number: i32,
    pub insertion_code: Option<char>,
    pub atom_name: String,
}

impl fmt::Display for AtomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.residue_number)?;
        if let Some(code) = self.insertion_code {
            write!(f, "{}", code)?;
        }
        write!(f, ":{}", self.atom_name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackboneAtom {
    pub key: AtomKey,
    pub position: Point3<f64>,
}

/// The on-disk structure formats understood by the backbone readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureFormat {
    Pdb,
    Mmcif,
}

impl StructureFormat {
    /// Picks the format from the file extension; anything other than `.cif`/`.mmcif` is
    /// read as PDB.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("cif") | Some("mmcif") => Self::Mmcif,
            _ => Self::Pdb,
        }
    }
}

/// Reads the backbone atoms of the first model of a PDB or mmCIF file.
pub fn read_backbone(path: &Path) -> Result<Vec<BackboneAtom>, StructureError> {
    match StructureFormat::from_path(path) {
        StructureFormat::Pdb => PdbFile::read_backbone_from_path(path),
        StructureFormat::Mmcif => MmcifFile::read_backbone_from_path(path),
    }
}

/// Mean B-factor over all atoms of the first model of a PDB file.
///
/// Deep-learning predictors store per-residue confidence (pLDDT) in this column. Returns
/// `None` when the file has no atom records with a readable B-factor.
pub fn read_mean_b_factor(path: &Path) -> Result<Option<f64>, StructureError> {
    let reader = io::BufReader::new(std::fs::File::open(path)?);
    let mut sum = 0.0;
    let mut count = 0usize;
    for line_res in reader.lines() {
        let line = line_res?;
        match slice_and_trim(&line, 0, 6) {
            "ENDMDL" | "END" => break,
            "ATOM" | "HETATM" => {
                if let Ok(b) = slice_and_trim(&line, 60, 66).parse::<f64>() {
                    sum += b;
                    count += 1;
                }
            }
            _ => {}
        }
    }
    Ok((count > 0).then(|| sum / count as f64))
}

pub fn positions(atoms: &[BackboneAtom]) -> Vec<Point3<f64>> {
    atoms.iter().map(|a| a.position).collect()
}

fn is_backbone(name: &str) -> bool {
    BACKBONE_ATOM_NAMES.contains(&name)
}

fn parse_insertion_code(value: &str) -> Option<char> {
    match value {
        "" | "." | "?" => None,
        other => other.chars().next(),
    }
}

fn slice_and_trim(line: &str, start: usize, end: usize) -> &str {
    line.get(start..end.min(line.len())).unwrap_or("").trim()
}

fn parse_coordinate(value: &str, field: &'static str, line: usize) -> Result<f64, StructureError> {
    value.parse().map_err(|_| StructureError::Parse {
        line,
        kind: StructureParseErrorKind::InvalidFloat {
            field,
            value: value.to_string(),
        },
    })
}

fn parse_residue_number(
    value: &str,
    field: &'static str,
    line: usize,
) -> Result<i32, StructureError> {
    value.parse().map_err(|_| StructureError::Parse {
        line,
        kind: StructureParseErrorKind::InvalidInt {
            field,
            value: value.to_string(),
        },
    })
}

/// Fixed-column PDB reader.
pub struct PdbFile;

impl StructureFile for PdbFile {
    fn read_backbone_from(reader: &mut impl BufRead) -> Result<Vec<BackboneAtom>, StructureError> {
        let mut atoms = Vec::new();
        let mut seen = HashSet::new();
        let mut models_seen = 0usize;

        for (line_num, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            let line_num = line_num + 1;

            match slice_and_trim(&line, 0, 6) {
                "MODEL" => {
                    models_seen += 1;
                    if models_seen > 1 {
                        break;
                    }
                }
                "ENDMDL" | "END" => break,
                "ATOM" | "HETATM" => {
                    let name = slice_and_trim(&line, 12, 16);
                    if !is_backbone(name) {
                        continue;
                    }
                    if line.len() < 54 {
                        return Err(StructureError::Parse {
                            line: line_num,
                            kind: StructureParseErrorKind::LineTooShort,
                        });
                    }

                    let key = AtomKey {
                        chain: slice_and_trim(&line, 21, 22).to_string(),
                        residue_number: parse_residue_number(
                            slice_and_trim(&line, 22, 26),
                            "resSeq (columns 23-26)",
                            line_num,
                        )?,
                        insertion_code: parse_insertion_code(slice_and_trim(&line, 26, 27)),
                        atom_name: name.to_string(),
                    };
                    let position = Point3::new(
                        parse_coordinate(slice_and_trim(&line, 30, 38), "x (columns 31-38)", line_num)?,
                        parse_coordinate(slice_and_trim(&line, 38, 46), "y (columns 39-46)", line_num)?,
                        parse_coordinate(slice_and_trim(&line, 46, 54), "z (columns 47-54)", line_num)?,
                    );

                    // Alternate locations repeat the key; the first one wins.
                    if seen.insert(key.clone()) {
                        atoms.push(BackboneAtom { key, position });
                    }
                }
                _ => {}
            }
        }
        Ok(atoms)
    }
}

/// `_atom_site` loop reader for PDBx/mmCIF files.
pub struct MmcifFile;

const ATOM_SITE_PREFIX: &str = "_atom_site.";

struct AtomSiteColumns {
    atom_name: usize,
    chain: usize,
    residue_number: usize,
    insertion_code: Option<usize>,
    x: usize,
    y: usize,
    z: usize,
    model: Option<usize>,
}

impl AtomSiteColumns {
    fn resolve(names: &[String]) -> Result<Self, StructureError> {
        let find = |name: &str| names.iter().position(|n| n == name);
        let either = |preferred: &'static str, fallback: &'static str| {
            find(preferred)
                .or_else(|| find(fallback))
                .ok_or(StructureError::MissingColumn(preferred))
        };
        let required = |name: &'static str| find(name).ok_or(StructureError::MissingColumn(name));

        Ok(Self {
            atom_name: either("auth_atom_id", "label_atom_id")?,
            chain: either("auth_asym_id", "label_asym_id")?,
            residue_number: either("auth_seq_id", "label_seq_id")?,
            insertion_code: find("pdbx_PDB_ins_code"),
            x: required("Cartn_x")?,
            y: required("Cartn_y")?,
            z: required("Cartn_z")?,
            model: find("pdbx_PDB_model_num"),
        })
    }
}

enum LoopState {
    Searching,
    LoopStart,
    Header(Vec<String>),
    Rows(Vec<String>, AtomSiteColumns),
}

impl StructureFile for MmcifFile {
    fn read_backbone_from(reader: &mut impl BufRead) -> Result<Vec<BackboneAtom>, StructureError> {
        let mut atoms = Vec::new();
        let mut seen = HashSet::new();
        let mut state = LoopState::Searching;
        let mut pending: Vec<String> = Vec::new();
        let mut first_model: Option<String> = None;

        for (line_num, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            let line_num = line_num + 1;
            let trimmed = line.trim();

            state = match state {
                LoopState::Searching => {
                    if trimmed == "loop_" {
                        LoopState::LoopStart
                    } else {
                        LoopState::Searching
                    }
                }
                LoopState::LoopStart => match trimmed.strip_prefix(ATOM_SITE_PREFIX) {
                    Some(column) => LoopState::Header(vec![column.to_string()]),
                    None if trimmed == "loop_" => LoopState::LoopStart,
                    None => LoopState::Searching,
                },
                LoopState::Header(mut names) => {
                    if let Some(column) = trimmed.strip_prefix(ATOM_SITE_PREFIX) {
                        names.push(column.to_string());
                        LoopState::Header(names)
                    } else {
                        let columns = AtomSiteColumns::resolve(&names)?;
                        pending.extend(tokenize(trimmed));
                        LoopState::Rows(names, columns)
                    }
                }
                LoopState::Rows(names, columns) => {
                    if trimmed.starts_with('#')
                        || trimmed.starts_with('_')
                        || trimmed == "loop_"
                        || trimmed.starts_with("data_")
                    {
                        break;
                    }
                    pending.extend(tokenize(trimmed));
                    LoopState::Rows(names, columns)
                }
            };

            if let LoopState::Rows(names, columns) = &state {
                let mut model_finished = false;
                while pending.len() >= names.len() {
                    let row: Vec<String> = pending.drain(..names.len()).collect();
                    if let Some(model_col) = columns.model {
                        let model = &row[model_col];
                        match &first_model {
                            None => first_model = Some(model.clone()),
                            Some(first) if first != model => {
                                model_finished = true;
                                break;
                            }
                            Some(_) => {}
                        }
                    }
                    if let Some(atom) = parse_atom_site_row(&row, columns, line_num)? {
                        if seen.insert(atom.key.clone()) {
                            atoms.push(atom);
                        }
                    }
                }
                if model_finished {
                    break;
                }
            }
        }
        Ok(atoms)
    }
}

fn parse_atom_site_row(
    row: &[String],
    columns: &AtomSiteColumns,
    line: usize,
) -> Result<Option<BackboneAtom>, StructureError> {
    let name = row[columns.atom_name].as_str();
    if !is_backbone(name) {
        return Ok(None);
    }
    let key = AtomKey {
        chain: row[columns.chain].clone(),
        residue_number: parse_residue_number(&row[columns.residue_number], "seq_id", line)?,
        insertion_code: columns
            .insertion_code
            .and_then(|col| parse_insertion_code(&row[col])),
        atom_name: name.to_string(),
    };
    let position = Point3::new(
        parse_coordinate(&row[columns.x], "Cartn_x", line)?,
        parse_coordinate(&row[columns.y], "Cartn_y", line)?,
        parse_coordinate(&row[columns.z], "Cartn_z", line)?,
    );
    Ok(Some(BackboneAtom { key, position }))
}

/// Splits a CIF data line into values, honouring single and double quotes.
///
/// A quote only closes a value when followed by whitespace or the end of the line, so
/// names such as `C3'` survive both quoted and unquoted.
fn tokenize(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            break;
        }
        if c == '\'' || c == '"' {
            let start = i + 1;
            let mut end = start;
            while end < chars.len()
                && !(chars[end] == c && chars.get(end + 1).is_none_or(|n| n.is_whitespace()))
            {
                end += 1;
            }
            tokens.push(chars[start..end.min(chars.len())].iter().collect());
            i = end + 1;
        } else {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() {
                i += 1;
            }
            tokens.push(chars[start..i].iter().collect());
        }
    }
    tokens
}

#[cfg(test)]
pub(crate) mod test_support {
    use nalgebra::Point3;
    use std::fs;
    use std::path::Path;

    /// Formats one fixed-column PDB ATOM record.
    pub fn pdb_atom_line(serial: usize, name: &str, chain: char, residue: i32, p: &Point3<f64>) -> String {
        let padded_name = if name.len() < 4 {
            format!(" {:<3}", name)
        } else {
            name.to_string()
        };
        format!(
            "ATOM  {:>5} {} {:>3} {}{:>4}    {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}          {:>2}",
            serial, padded_name, "G", chain, residue, p.x, p.y, p.z, 1.0, 0.0, &name[..1]
        )
    }

    /// Writes a single-model PDB whose residues each carry one `C3'` atom at the given
    /// position.
    pub fn write_c3_trace(path: &Path, trace: &[Point3<f64>]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut text = String::new();
        for (i, p) in trace.iter().enumerate() {
            text.push_str(&pdb_atom_line(i + 1, "C3'", 'A', i as i32 + 1, p));
            text.push('\n');
        }
        text.push_str("END\n");
        fs::write(path, text).unwrap();
    }
}
