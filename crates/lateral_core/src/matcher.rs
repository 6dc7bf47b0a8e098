//! Tolerant identity joins between assets, inspections and defects.
//!
//! Keys from different exports disagree on case, padding and leading zeros
//! ("007" vs 7). Every key is registered in three tiers (exact, folded,
//! numeric) and lookups try the tiers in that order, so an exact hit always
//! beats a normalized one.

use std::collections::{HashMap, HashSet};

use crate::model::{Asset, DefectRecord, InspectionRecord};

/// Which tier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    Folded,
    Numeric,
}

/// Which identity an inspection joined through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPath {
    PipeSegmentReference(MatchTier),
    AssetId(MatchTier),
}

/// Digits-only keys with leading zeros removed; `None` for anything else.
pub fn numeric_key(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() || !t.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let stripped = t.trim_start_matches('0');
    Some(if stripped.is_empty() { "0".into() } else { stripped.into() })
}

/// Multi-valued key index over positions in some slice.
#[derive(Debug, Default)]
pub struct KeyIndex {
    exact: HashMap<String, Vec<usize>>,
    folded: HashMap<String, Vec<usize>>,
    numeric: HashMap<String, Vec<usize>>,
}

impl KeyIndex {
    /// Registers `raw` for `position`. Blank keys are ignored.
    pub fn insert(&mut self, raw: &str, position: usize) -> bool {
        let t = raw.trim();
        if t.is_empty() {
            return false;
        }

        self.exact.entry(t.to_string()).or_default().push(position);
        self.folded.entry(t.to_lowercase()).or_default().push(position);
        if let Some(n) = numeric_key(t) {
            self.numeric.entry(n).or_default().push(position);
        }
        true
    }

    pub fn contains_exact(&self, raw: &str) -> bool {
        self.exact.contains_key(raw.trim())
    }

    /// Positions from the first tier that knows `raw`.
    pub fn lookup(&self, raw: &str) -> Option<(&[usize], MatchTier)> {
        let t = raw.trim();
        if t.is_empty() {
            return None;
        }

        if let Some(hit) = self.exact.get(t) {
            return Some((hit, MatchTier::Exact));
        }
        if let Some(hit) = self.folded.get(&t.to_lowercase()) {
            return Some((hit, MatchTier::Folded));
        }
        numeric_key(t)
            .and_then(|n| self.numeric.get(&n))
            .map(|hit| (hit.as_slice(), MatchTier::Numeric))
    }

    /// First position registered under `raw`, by tier precedence.
    pub fn first(&self, raw: &str) -> Option<(usize, MatchTier)> {
        self.lookup(raw)
            .and_then(|(hits, tier)| hits.first().map(|p| (*p, tier)))
    }

    /// Every position any tier knows for `raw`, deduplicated, in tier order.
    pub fn all(&self, raw: &str) -> Vec<usize> {
        let t = raw.trim();
        if t.is_empty() {
            return Vec::new();
        }

        let tiers = [
            self.exact.get(t),
            self.folded.get(&t.to_lowercase()),
            numeric_key(t).and_then(|n| self.numeric.get(&n)),
        ];

        let mut seen = HashSet::new();
        tiers
            .into_iter()
            .flatten()
            .flatten()
            .copied()
            .filter(|p| seen.insert(*p))
            .collect()
    }
}

/// Lookup from inspection references to assets.
///
/// FIDs are the primary identity. Assets exported without an FID are only
/// reachable through their id, and only after the FID lookup fails.
#[derive(Debug)]
pub struct AssetIndex<'a> {
    assets: &'a [Asset],
    by_fid: KeyIndex,
    by_asset_id: KeyIndex,
    duplicates: usize,
}

impl<'a> AssetIndex<'a> {
    pub fn build(assets: &'a [Asset]) -> Self {
        let mut by_fid = KeyIndex::default();
        let mut by_asset_id = KeyIndex::default();
        let mut duplicates = 0;

        for (position, asset) in assets.iter().enumerate() {
            match (&asset.fid, &asset.asset_id) {
                (Some(fid), _) => {
                    if by_fid.contains_exact(fid) {
                        duplicates += 1;
                        tracing::warn!(fid = %fid, position, "Duplicate asset FID; keeping the first occurrence");
                        continue;
                    }
                    by_fid.insert(fid, position);
                }
                (None, Some(id)) => {
                    if by_asset_id.contains_exact(id) {
                        duplicates += 1;
                        tracing::warn!(asset_id = %id, position, "Duplicate asset id; keeping the first occurrence");
                        continue;
                    }
                    by_asset_id.insert(id, position);
                }
                (None, None) => {
                    tracing::debug!(position, "Asset has no identity and cannot be joined");
                }
            }
        }

        Self {
            assets,
            by_fid,
            by_asset_id,
            duplicates,
        }
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Resolves a pipe segment reference (against FIDs) and then an asset id
    /// (against id-only assets). The segment reference doubles as an id
    /// candidate because some exports only carry one of the two.
    pub fn resolve(
        &self,
        pipe_segment_reference: Option<&str>,
        asset_id: Option<&str>,
    ) -> Option<(&'a Asset, JoinPath)> {
        let assets: &'a [Asset] = self.assets;

        if let Some((position, tier)) = pipe_segment_reference.and_then(|r| self.by_fid.first(r)) {
            return Some((&assets[position], JoinPath::PipeSegmentReference(tier)));
        }

        [asset_id, pipe_segment_reference]
            .into_iter()
            .flatten()
            .find_map(|id| self.by_asset_id.first(id))
            .map(|(position, tier)| (&assets[position], JoinPath::AssetId(tier)))
    }

    pub fn resolve_inspection(&self, inspection: &InspectionRecord) -> Option<(&'a Asset, JoinPath)> {
        self.resolve(
            inspection.pipe_segment_reference.as_deref(),
            inspection.asset_id.as_deref(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct MatchedInspection<'a> {
    pub asset: &'a Asset,
    pub asset_key: &'a str,
    pub inspection: &'a InspectionRecord,
    pub via: JoinPath,
}

#[derive(Debug, Default)]
pub struct InspectionMatches<'a> {
    /// In inspection order.
    pub matched: Vec<MatchedInspection<'a>>,
    pub unmatched: Vec<&'a InspectionRecord>,
    pub duplicate_assets: usize,
}

impl<'a> InspectionMatches<'a> {
    /// Inspections grouped under their asset key.
    pub fn by_asset(&self) -> HashMap<&'a str, Vec<&'a InspectionRecord>> {
        let mut groups: HashMap<&str, Vec<&InspectionRecord>> = HashMap::new();
        for m in &self.matched {
            groups.entry(m.asset_key).or_default().push(m.inspection);
        }
        groups
    }
}

/// Joins every inspection to at most one asset. Unmatched inspections are
/// reported, never fatal.
pub fn match_inspections<'a>(
    inspections: &'a [InspectionRecord],
    assets: &'a [Asset],
) -> InspectionMatches<'a> {
    let index = AssetIndex::build(assets);
    match_with_index(&index, inspections)
}

pub fn match_with_index<'a>(
    index: &AssetIndex<'a>,
    inspections: &'a [InspectionRecord],
) -> InspectionMatches<'a> {
    let mut out = InspectionMatches {
        duplicate_assets: index.duplicates(),
        ..Default::default()
    };

    for inspection in inspections {
        let resolved = index
            .resolve_inspection(inspection)
            .and_then(|(asset, via)| asset.key().map(|key| (asset, key, via)));

        match resolved {
            Some((asset, asset_key, via)) => out.matched.push(MatchedInspection {
                asset,
                asset_key,
                inspection,
                via,
            }),
            None => {
                tracing::debug!(
                    inspection = %inspection.reference(),
                    pipe_segment_reference = ?inspection.pipe_segment_reference,
                    asset_id = ?inspection.asset_id,
                    "No asset matches inspection"
                );
                out.unmatched.push(inspection);
            }
        }
    }

    tracing::info!(
        matched = out.matched.len(),
        unmatched = out.unmatched.len(),
        duplicate_assets = out.duplicate_assets,
        "Inspections joined to assets"
    );
    out
}

/// Defects keyed by inspection id and by pipe segment reference.
#[derive(Debug)]
pub struct DefectIndex<'a> {
    defects: &'a [DefectRecord],
    by_inspection: KeyIndex,
    by_segment: KeyIndex,
}

impl<'a> DefectIndex<'a> {
    pub fn build(defects: &'a [DefectRecord]) -> Self {
        let mut by_inspection = KeyIndex::default();
        let mut by_segment = KeyIndex::default();

        for (position, defect) in defects.iter().enumerate() {
            if let Some(id) = &defect.inspection_id {
                by_inspection.insert(id, position);
            }
            if let Some(psr) = &defect.pipe_segment_reference {
                by_segment.insert(psr, position);
            }
        }

        Self {
            defects,
            by_inspection,
            by_segment,
        }
    }

    /// Defects joined to an inspection through either key, each defect at
    /// most once (by position and by defect id).
    pub fn for_inspection(&self, inspection: &InspectionRecord) -> Vec<&'a DefectRecord> {
        let by_id = inspection
            .inspection_id
            .as_deref()
            .map(|id| self.by_inspection.all(id))
            .unwrap_or_default();
        let by_psr = inspection
            .pipe_segment_reference
            .as_deref()
            .map(|psr| self.by_segment.all(psr))
            .unwrap_or_default();

        let defects: &'a [DefectRecord] = self.defects;
        let mut seen_positions = HashSet::new();
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();

        for position in by_id.into_iter().chain(by_psr) {
            if !seen_positions.insert(position) {
                continue;
            }
            let defect = &defects[position];
            if let Some(id) = defect.defect_id.as_deref() {
                if !seen_ids.insert(id) {
                    continue;
                }
            }
            out.push(defect);
        }
        out
    }
}

/// Inspections keyed by inspection id, for joining tap defects back.
#[derive(Debug)]
pub struct InspectionIndex<'a> {
    inspections: &'a [InspectionRecord],
    by_id: KeyIndex,
}

impl<'a> InspectionIndex<'a> {
    pub fn build(inspections: &'a [InspectionRecord]) -> Self {
        let mut by_id = KeyIndex::default();
        for (position, inspection) in inspections.iter().enumerate() {
            if let Some(id) = &inspection.inspection_id {
                by_id.insert(id, position);
            }
        }
        Self { inspections, by_id }
    }

    pub fn get(&self, inspection_id: &str) -> Option<&'a InspectionRecord> {
        let inspections: &'a [InspectionRecord] = self.inspections;
        self.by_id
            .first(inspection_id)
            .map(|(position, _)| &inspections[position])
    }
}
