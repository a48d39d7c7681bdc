use std::path::PathBuf;

/// Ordered raw captures of one capturing phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSet {
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
}

