//! Named pose table and nearest-match classification
//!
//! Operators teach the station a library of labeled reference poses
//! ("LensGrip", "BondSite", ...). [`PoseResolver`] answers "where am I" by
//! scanning that table in insertion order and returning the FIRST entry whose
//! every axis lies strictly within the tolerance. First-match, not best-match:
//! when two entries both qualify, table order decides, so iteration order is
//! part of the contract.
//!
//! The table is cached after load; staleness is bounded by the explicit
//! [`PoseResolver::reload`] call rather than a re-read on every resolution.

use crate::pose::Pose;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default per-axis match tolerance: 0.002 mm on linear axes, 0.002 degrees
/// on rotational ones.
pub const DEFAULT_TOLERANCE: f64 = 0.002;

/// One labeled reference pose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedPose {
    pub name: String,
    pub pose: Pose,
}

/// Ordered table of labeled reference poses. Order is the YAML list order and
/// is significant for resolution.
#[derive(Debug, Clone, Default)]
pub struct NamedPoseTable {
    entries: Vec<NamedPose>,
}

impl NamedPoseTable {
    pub fn from_entries(entries: Vec<NamedPose>) -> Self {
        Self { entries }
    }

    /// Load from a YAML list of `{name, pose}` entries.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read pose table {}", path.display()))?;
        let entries: Vec<NamedPose> = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse pose table {}", path.display()))?;
        info!("loaded {} named poses from {}", entries.len(), path.display());
        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedPose> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a pose classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPose {
    /// Label of the first table entry within tolerance.
    Named(String),
    /// No entry within tolerance on every axis.
    Unknown,
}

impl fmt::Display for ResolvedPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedPose::Named(label) => f.write_str(label),
            ResolvedPose::Unknown => f.write_str("unknown"),
        }
    }
}

/// Classifies poses against a [`NamedPoseTable`].
#[derive(Debug)]
pub struct PoseResolver {
    table: NamedPoseTable,
    tolerance: f64,
    source: Option<PathBuf>,
}

impl PoseResolver {
    pub fn new(table: NamedPoseTable, tolerance: f64) -> Self {
        Self {
            table,
            tolerance,
            source: None,
        }
    }

    /// Load the table from a YAML file, remembering the path for [`reload`].
    ///
    /// [`reload`]: PoseResolver::reload
    pub fn load_from_path(path: impl Into<PathBuf>, tolerance: f64) -> Result<Self> {
        let path = path.into();
        let table = NamedPoseTable::load_from_path(&path)?;
        Ok(Self {
            table,
            tolerance,
            source: Some(path),
        })
    }

    /// Re-read the table from its source file.
    pub fn reload(&mut self) -> Result<()> {
        let path = self
            .source
            .as_ref()
            .context("pose table has no backing file to reload from")?;
        self.table = NamedPoseTable::load_from_path(path)?;
        Ok(())
    }

    pub fn table(&self) -> &NamedPoseTable {
        &self.table
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// First table entry whose every axis difference is strictly less than
    /// the tolerance, or [`ResolvedPose::Unknown`].
    pub fn resolve(&self, pose: &Pose) -> ResolvedPose {
        for entry in self.table.iter() {
            if pose.within(&entry.pose, self.tolerance) {
                return ResolvedPose::Named(entry.name.clone());
            }
        }
        ResolvedPose::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NamedPoseTable {
        NamedPoseTable::from_entries(vec![
            NamedPose {
                name: "Home".to_string(),
                pose: Pose::default(),
            },
            NamedPose {
                name: "Park".to_string(),
                pose: Pose::new(0.001, 0.0, 0.0, 0.0, 0.0, 0.0),
            },
        ])
    }

    #[test]
    fn first_match_wins_when_both_qualify() {
        // (0,0,0,0,0,0) is within 0.002 of both Home and Park; table order
        // decides and Home comes first.
        let resolver = PoseResolver::new(table(), DEFAULT_TOLERANCE);
        assert_eq!(
            resolver.resolve(&Pose::default()),
            ResolvedPose::Named("Home".to_string())
        );
    }

    #[test]
    fn far_pose_is_unknown() {
        let resolver = PoseResolver::new(table(), DEFAULT_TOLERANCE);
        let result = resolver.resolve(&Pose::new(5.0, 5.0, 5.0, 0.0, 0.0, 0.0));
        assert_eq!(result, ResolvedPose::Unknown);
        assert_eq!(result.to_string(), "unknown");
    }

    #[test]
    fn tolerance_is_strict_per_axis() {
        let resolver = PoseResolver::new(table(), DEFAULT_TOLERANCE);
        // Exactly tolerance away from Home on one axis: beyond Home, but
        // within 0.002 of Park (|0.002 - 0.001| = 0.001).
        let pose = Pose::new(0.002, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(
            resolver.resolve(&pose),
            ResolvedPose::Named("Park".to_string())
        );
    }

    #[test]
    fn yaml_round_trip_preserves_order() {
        let yaml = "
- name: LensGrip
  pose: { x: 12.5, y: 0.0, z: -3.0, u: 0.0, v: 0.0, w: 90.0 }
- name: BondSite
  pose: { x: 12.5, y: 0.0, z: -3.0, u: 0.0, v: 0.0, w: 90.0 }
";
        let entries: Vec<NamedPose> = serde_yaml::from_str(yaml).unwrap();
        let table = NamedPoseTable::from_entries(entries);
        let resolver = PoseResolver::new(table, DEFAULT_TOLERANCE);
        // Duplicate poses resolve to whichever entry was listed first.
        assert_eq!(
            resolver.resolve(&Pose::new(12.5, 0.0, -3.0, 0.0, 0.0, 90.0)),
            ResolvedPose::Named("LensGrip".to_string())
        );
    }

    #[test]
    fn empty_table_resolves_unknown() {
        let resolver = PoseResolver::new(NamedPoseTable::default(), DEFAULT_TOLERANCE);
        assert_eq!(resolver.resolve(&Pose::default()), ResolvedPose::Unknown);
    }
}
