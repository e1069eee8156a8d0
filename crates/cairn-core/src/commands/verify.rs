//! Recursive verification of stored objects.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::cas::{ObjectId, ObjectManager};
use crate::error::Result;
use crate::fs::EntryType;
use crate::snapshot::{self, Listing};

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Descend into directory objects.
    pub recursive: bool,
    /// Stop after this many errors; 0 stops on the first.
    pub max_errors: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            max_errors: 0,
        }
    }
}

/// A single problem found during verification.
#[derive(Debug)]
pub struct VerifyIssue {
    pub path: String,
    pub message: String,
}

pub struct VerifyResult {
    pub errors: Vec<VerifyIssue>,
    pub objects_verified: usize,
}

/// Walk an object identifier, confirming every referenced object re-reads
/// and matches its expected length.
pub fn run(
    manager: &dyn ObjectManager,
    root: &ObjectId,
    options: &VerifyOptions,
) -> Result<VerifyResult> {
    let mut verifier = Verifier {
        manager,
        options,
        visited: HashSet::new(),
        errors: Vec::new(),
        objects_verified: 0,
    };

    if options.recursive {
        verifier.verify_directory(root, root.as_str());
    }

    // The root gets an unconditional object check; the visited set bounds
    // the duplicate work when the directory walk saw it already.
    verifier.verify_object(root, root.as_str(), None);

    Ok(VerifyResult {
        errors: verifier.errors,
        objects_verified: verifier.objects_verified,
    })
}

struct Verifier<'a> {
    manager: &'a dyn ObjectManager,
    options: &'a VerifyOptions,
    visited: HashSet<String>,
    errors: Vec<VerifyIssue>,
    objects_verified: usize,
}

impl Verifier<'_> {
    /// Record an issue. Returns `true` when the error threshold is reached
    /// and the walk must stop.
    fn report_error(&mut self, path: &str, message: String) -> bool {
        warn!(path, %message, "verification error");
        self.errors.push(VerifyIssue {
            path: path.to_string(),
            message,
        });
        self.errors.len() >= self.options.max_errors
    }

    /// Returns `false` when the walk must stop.
    fn verify_directory(&mut self, oid: &ObjectId, path: &str) -> bool {
        if !self.visited.insert(oid.to_string()) {
            return true;
        }

        debug!(path, oid = %oid, "verifying directory");

        let listing = match self.read_listing(oid) {
            Ok(listing) => listing,
            Err(e) => {
                return !self.report_error(path, format!("error reading directory {oid}: {e}"));
            }
        };

        for entry in &listing.entries {
            let child_path = format!("{path}/{}", entry.name);

            if entry.entry_type == EntryType::Directory && self.options.recursive {
                if !self.verify_directory(&entry.object_id, &child_path) {
                    return false;
                }
            }

            if !self.verify_object(&entry.object_id, &child_path, Some(entry.size)) {
                return false;
            }
        }

        true
    }

    /// Returns `false` when the walk must stop.
    fn verify_object(&mut self, oid: &ObjectId, path: &str, expected_length: Option<u64>) -> bool {
        if !self.visited.insert(oid.to_string()) {
            return true;
        }

        debug!(path, oid = %oid, "verifying object");

        match self.manager.verify(oid) {
            Ok(length) => {
                self.objects_verified += 1;
                if let Some(expected) = expected_length {
                    if length != expected {
                        return !self.report_error(
                            path,
                            format!("invalid object length {length}, expected {expected}"),
                        );
                    }
                }
                true
            }
            Err(e) => !self.report_error(path, format!("invalid object {oid}: {e}")),
        }
    }

    fn read_listing(&self, oid: &ObjectId) -> Result<Listing> {
        let reader = self.manager.open(oid)?;
        snapshot::read_listing(reader)
    }
}
