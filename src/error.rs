use std::path::PathBuf;

use thiserror::Error;

/// Tool reports that do not have the shape the upstream tool always writes.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{path:?}: missing `{field}` line in dnadiff report")]
    MissingDnadiffField { path: PathBuf, field: &'static str },
    #[error("{path:?}: expected reference and query ids on the first line")]
    MissingDnadiffHeader { path: PathBuf },
    #[error("{path:?}: could not parse {what} from `{value}`")]
    InvalidNumber {
        path: PathBuf,
        what: String,
        value: String,
    },
    #[error("{path:?}: missing column `{column}`")]
    MissingColumn { path: PathBuf, column: String },
    #[error("Malformed reference accession: {0}")]
    InvalidAccession(String),
    #[error("Bin file name has no bin number field: {0:?}")]
    MissingBinNumber(PathBuf),
}
