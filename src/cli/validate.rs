//! Validation subcommand

use super::CliError;
use crate::identifier::GroupRef;
use crate::output::{read_manifest, OutputPathBuilder};
use clap::Parser;
use std::path::Path;
use std::path::PathBuf;

/// Validate command for checking group references and manifests
#[derive(Parser, Debug)]
pub struct ValidateCommand {
    /// What to validate
    #[command(subcommand)]
    pub target: ValidateTarget,
}

/// Target type for validation
#[derive(clap::Subcommand, Debug)]
pub enum ValidateTarget {
    /// Validate a group reference
    Group {
        /// Reference to validate (e.g., mix:0123abcd)
        reference: String,
    },
    /// Validate a manifest file written by a previous download
    Manifest {
        /// Manifest path (e.g., data/mix/0123abcd/manifest.json)
        path: PathBuf,
    },
}

impl ValidateCommand {
    /// Execute the validation command
    pub async fn execute(&self, data_dir: &Path) -> Result<(), CliError> {
        match &self.target {
            ValidateTarget::Group { reference } => self.validate_group(reference, data_dir),
            ValidateTarget::Manifest { path } => self.validate_manifest(path),
        }
    }

    fn validate_group(&self, reference: &str, data_dir: &Path) -> Result<(), CliError> {
        match GroupRef::parse(reference) {
            Ok(group) => {
                for line in group_report(&group, data_dir) {
                    println!("{line}");
                }
                Ok(())
            }
            Err(e) => {
                eprintln!("Invalid group reference: {e}");
                Err(CliError::IdentifierError(e))
            }
        }
    }

    fn validate_manifest(&self, path: &Path) -> Result<(), CliError> {
        let entries = read_manifest(path)?;

        println!("Valid manifest: {}", path.display());
        println!("  Tracks: {}", entries.len());

        let total_seconds: u64 = entries.iter().map(|e| u64::from(e.duration)).sum();
        println!(
            "  Total duration: {}:{:02}:{:02}",
            total_seconds / 3600,
            (total_seconds % 3600) / 60,
            total_seconds % 60
        );

        let mut seen = std::collections::HashSet::new();
        let duplicates = entries.iter().filter(|e| !seen.insert(&e.id)).count();
        if duplicates > 0 {
            println!("  Duplicate track ids: {duplicates}");
        }

        Ok(())
    }
}

/// Lines describing where a group is listed from and written to
fn group_report(group: &GroupRef, data_dir: &Path) -> Vec<String> {
    let output_dir = OutputPathBuilder::new(data_dir.to_path_buf(), group).group_dir();
    vec![
        format!("Valid group reference: {group}"),
        format!("  Kind: {}", group.kind()),
        format!("  Id: {}", group.id()),
        format!(
            "  Endpoint: /{}/{}/items",
            group.kind().endpoint_segment(),
            group.id()
        ),
        format!("  Output directory: {}", output_dir.display()),
    ]
}
