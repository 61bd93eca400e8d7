//! Atrio export engine: paginated PDF reports for one or many feedback
//! records, and pretty-printed JSON backups of the whole collection.
//!
//! Documents are built fully in memory; nothing touches the filesystem until
//! rendering has succeeded, so a failure can never leave a partial download
//! behind.

#![forbid(unsafe_code)]

mod backup;
mod doc;
mod report;

pub use backup::{backup_all, last_backup, BackupReceipt};
pub use report::{
    bulk_file_name, export_many, export_one, render_bulk, render_single, single_file_name,
    ExportedReport,
};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Exporting nothing is a guarded no-op, not a blank document.
    #[error("no feedback rows selected")]
    NothingSelected,

    #[error("pdf rendering failed: {0}")]
    Pdf(#[from] printpdf::Error),

    #[error("backup serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("backup stamp not persisted: {0}")]
    Meta(#[from] anyhow::Error),
}
