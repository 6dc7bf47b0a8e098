//! Builds lateral and tap records from a joined batch.
//!
//! A run has two phases. Placement (join, project, validate) is pure and
//! runs data-parallel on the rayon pool, off the async worker that called
//! [`Assembler::run`]. Geocoding is the only suspending step; it runs with
//! bounded concurrency and preserves record order.

use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{InputError, SkipReason};
use crate::geocode::{
    CachingGeocoder, GeocodeStatus, ResolvedAddress, ReverseGeocoder, DEFAULT_CACHE_DECIMALS,
    DEFAULT_GEOCODE_TIMEOUT,
};
use crate::geodesy::LngLat;
use crate::matcher::{match_with_index, AssetIndex, DefectIndex, InspectionIndex, MatchedInspection};
use crate::model::{
    self, to_meters, Asset, AssetGeometry, DefectRecord, InspectionRecord, LateralInspection,
    LocatedDefect, Source, TapInspection,
};
use crate::projector::{
    Projector, DEFAULT_LATERAL_OFFSET_M, DEFAULT_STUB_LENGTH_M, DEFAULT_TANGENT_SAMPLE_M,
};
use crate::stats::{ProcessingStats, RecordKind, SkippedRecord};
use crate::validate::{CoordinateValidator, SwapThresholds};

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub stub_length_m: f64,
    pub lateral_offset_m: f64,
    pub tangent_sample_m: f64,
    pub geocode_timeout: Duration,
    /// Geocode calls in flight at once.
    pub geocode_concurrency: usize,
    /// Coordinates are rounded to this many decimals for the geocode cache.
    pub cache_decimals: u32,
    /// Clock position assumed for taps recorded without one.
    pub default_tap_clock: f64,
    pub swap_thresholds: SwapThresholds,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            stub_length_m: DEFAULT_STUB_LENGTH_M,
            lateral_offset_m: DEFAULT_LATERAL_OFFSET_M,
            tangent_sample_m: DEFAULT_TANGENT_SAMPLE_M,
            geocode_timeout: DEFAULT_GEOCODE_TIMEOUT,
            geocode_concurrency: 8,
            cache_decimals: DEFAULT_CACHE_DECIMALS,
            default_tap_clock: 12.0,
            swap_thresholds: SwapThresholds::default(),
        }
    }
}

/// Parsed inputs for one run.
#[derive(Debug, Clone, Default)]
pub struct InputBatch {
    pub assets: Vec<Asset>,
    pub inspections: Vec<InspectionRecord>,
    pub defects: Vec<DefectRecord>,
}

impl InputBatch {
    pub fn from_json(
        assets: &Value,
        inspections: &Value,
        defects: Option<&Value>,
    ) -> Result<Self, InputError> {
        Ok(Self {
            assets: model::parse_assets(assets)?,
            inspections: model::parse_inspections(inspections)?,
            defects: defects.map(model::parse_defects).transpose()?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub laterals: Vec<LateralInspection>,
    pub taps: Vec<TapInspection>,
    pub skipped: Vec<SkippedRecord>,
    pub stats: ProcessingStats,
}

impl Assembly {
    /// Appends every tap to the laterals under `layer_name`.
    pub fn promote_taps(&mut self, layer_name: &str) -> usize {
        let promoted = promote_taps(&self.taps, layer_name);
        let n = promoted.len();
        self.laterals.extend(promoted);
        self.stats.promoted_tap_count += n;
        n
    }
}

/// Taps as laterals on a named layer, keeping their defect provenance.
pub fn promote_taps(taps: &[TapInspection], layer_name: &str) -> Vec<LateralInspection> {
    taps.iter()
        .map(|tap| LateralInspection {
            asset_key: tap.asset_key.clone(),
            inspection_id: tap.inspection_id.clone(),
            pipe_segment_reference: tap.pipe_segment_reference.clone(),
            distance_m: tap.distance_m,
            clock_position: tap.clock_position,
            coordinates: tap.coordinates,
            connection_point: tap.connection_point,
            stub_line: tap.stub_line,
            address: tap.address.clone(),
            geocode_status: tap.geocode_status,
            direction: None,
            upstream_manhole: None,
            downstream_manhole: None,
            defects: Vec::new(),
            source: Source::Tap,
            layer_name: Some(layer_name.to_string()),
            tap_defect_id: tap.defect_id.clone(),
            tap_defect_code: Some(tap.defect_code.clone()),
        })
        .collect()
}

/// Each part is validated on its own; `stub_line` needs both ends valid.
struct Placement {
    coordinates: LngLat,
    connection_point: Option<LngLat>,
    stub_line: Option<[LngLat; 2]>,
}

struct Draft<T> {
    record: T,
    stub_fallback: bool,
}

/// Output of the placement phase, before geocoding.
struct Placed {
    laterals: Vec<Draft<LateralInspection>>,
    taps: Vec<Draft<TapInspection>>,
    skipped: Vec<SkippedRecord>,
    duplicate_assets: usize,
}

/// Runs CPU-bound `f` without stalling the async worker it was called on.
///
/// On a multi-threaded runtime the worker hands its other tasks off first.
/// Elsewhere (current-thread runtimes, plain threads) `f` runs inline.
fn off_runtime<R>(f: impl FnOnce() -> R) -> R {
    use tokio::runtime::{Handle, RuntimeFlavor};

    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

trait Addressed {
    fn coordinates(&self) -> LngLat;
    fn set_address(&mut self, address: ResolvedAddress);
}

impl Addressed for LateralInspection {
    fn coordinates(&self) -> LngLat {
        self.coordinates
    }

    fn set_address(&mut self, address: ResolvedAddress) {
        self.address = address.address;
        self.geocode_status = address.status;
    }
}

impl Addressed for TapInspection {
    fn coordinates(&self) -> LngLat {
        self.coordinates
    }

    fn set_address(&mut self, address: ResolvedAddress) {
        self.address = address.address;
        self.geocode_status = address.status;
    }
}

/// Owns the geocode cache, so one assembler should live as long as the
/// service that uses it.
#[derive(Debug)]
pub struct Assembler {
    config: AssemblerConfig,
    projector: Projector,
    validator: CoordinateValidator,
    geocoder: CachingGeocoder,
}

impl Assembler {
    pub fn new(config: AssemblerConfig, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        let projector = Projector {
            lateral_offset_m: config.lateral_offset_m,
            tangent_sample_m: config.tangent_sample_m,
        };
        let validator = CoordinateValidator::new(config.swap_thresholds);
        let geocoder = CachingGeocoder::new(geocoder, config.geocode_timeout, config.cache_decimals);

        Self {
            config,
            projector,
            validator,
            geocoder,
        }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn geocoder(&self) -> &CachingGeocoder {
        &self.geocoder
    }

    pub async fn run(&self, batch: &InputBatch) -> Assembly {
        let Placed {
            laterals: lateral_drafts,
            taps: tap_drafts,
            skipped,
            duplicate_assets,
        } = off_runtime(|| self.place_batch(batch));

        let mut stats = ProcessingStats {
            duplicate_assets,
            stub_fallbacks: lateral_drafts.iter().filter(|d| d.stub_fallback).count()
                + tap_drafts.iter().filter(|d| d.stub_fallback).count(),
            ..Default::default()
        };
        for skip in &skipped {
            stats.record_skip(skip);
        }

        let laterals = self.geocode_all(lateral_drafts).await;
        let taps = self.geocode_all(tap_drafts).await;

        stats.processed_count = laterals.len();
        stats.tap_count = taps.len();
        stats.defect_count = laterals.iter().map(|l| l.defects.len()).sum();
        stats.geocode_failures = laterals
            .iter()
            .map(|l| l.geocode_status)
            .chain(taps.iter().map(|t| t.geocode_status))
            .filter(|s| s.is_failure())
            .count();

        tracing::info!(
            processed = stats.processed_count,
            skipped = stats.skipped_count,
            unmatched = stats.unmatched_inspections,
            taps = stats.tap_count,
            defects = stats.defect_count,
            stub_fallbacks = stats.stub_fallbacks,
            geocode_failures = stats.geocode_failures,
            "Lateral assembly finished"
        );

        Assembly {
            laterals,
            taps,
            skipped,
            stats,
        }
    }

    fn place_batch(&self, batch: &InputBatch) -> Placed {
        let asset_index = AssetIndex::build(&batch.assets);
        let matches = match_with_index(&asset_index, &batch.inspections);
        let defect_index = DefectIndex::build(&batch.defects);
        let inspection_index = InspectionIndex::build(&batch.inspections);

        let mut skipped: Vec<SkippedRecord> = matches
            .unmatched
            .iter()
            .map(|inspection| SkippedRecord {
                kind: RecordKind::Lateral,
                reference: inspection.reference(),
                asset_key: None,
                reason: SkipReason::UnresolvableJoin,
            })
            .collect();

        let lateral_results: Vec<_> = matches
            .matched
            .par_iter()
            .map(|m| self.draft_lateral(m, &defect_index))
            .collect();

        let tap_results: Vec<_> = batch
            .defects
            .par_iter()
            .filter(|d| d.is_tap())
            .map(|d| self.draft_tap(d, &asset_index, &inspection_index))
            .collect();

        let laterals = split_results(lateral_results, &mut skipped);
        let taps = split_results(tap_results, &mut skipped);

        Placed {
            laterals,
            taps,
            skipped,
            duplicate_assets: matches.duplicate_assets,
        }
    }

    async fn geocode_all<T: Addressed>(&self, drafts: Vec<Draft<T>>) -> Vec<T> {
        let concurrency = self.config.geocode_concurrency.max(1);

        stream::iter(drafts)
            .map(|mut draft| async move {
                let address = self.geocoder.lookup(draft.record.coordinates()).await;
                draft.record.set_address(address);
                draft.record
            })
            .buffered(concurrency)
            .collect()
            .await
    }

    fn place(
        &self,
        geometry: &AssetGeometry,
        distance_m: f64,
        clock: f64,
    ) -> Result<Placement, SkipReason> {
        let raw = self
            .projector
            .project(geometry, distance_m, Some(clock))
            .map_err(|e| {
                tracing::debug!(error = %e, "Projection failed");
                SkipReason::from(&e)
            })?;
        let coordinates = self
            .validator
            .validate(&raw)
            .ok_or(SkipReason::InvalidCoordinate)?;

        let Ok(stub) = self
            .projector
            .stub(geometry, distance_m, Some(clock), self.config.stub_length_m)
        else {
            return Ok(Placement {
                coordinates,
                connection_point: None,
                stub_line: None,
            });
        };

        let [p0, p1] = stub.stub_line;
        let stub_line = self
            .validator
            .validate(&p0)
            .zip(self.validator.validate(&p1))
            .map(|(a, b)| [a, b]);
        if stub_line.is_none() {
            tracing::debug!(distance_m, clock, "Stub line failed validation");
        }

        Ok(Placement {
            coordinates,
            connection_point: self.validator.validate(&stub.connection_point),
            stub_line,
        })
    }

    fn draft_lateral(
        &self,
        m: &MatchedInspection<'_>,
        defects: &DefectIndex<'_>,
    ) -> Result<Draft<LateralInspection>, SkippedRecord> {
        let inspection = m.inspection;
        let skip = |reason| SkippedRecord {
            kind: RecordKind::Lateral,
            reference: inspection.reference(),
            asset_key: Some(m.asset_key.to_string()),
            reason,
        };

        let distance = inspection
            .tap_distance
            .ok_or_else(|| skip(SkipReason::MissingTapDistance))?;
        let clock = inspection
            .clock_position
            .ok_or_else(|| skip(SkipReason::MissingClockPosition))?;
        let distance_m = to_meters(distance, inspection.imperial);

        let placement = self.place(&m.asset.geometry, distance_m, clock).map_err(skip)?;

        let located = defects
            .for_inspection(inspection)
            .into_iter()
            .map(|d| self.locate_defect(&m.asset.geometry, d, inspection.imperial))
            .collect();

        Ok(Draft {
            stub_fallback: placement.stub_line.is_none(),
            record: LateralInspection {
                asset_key: m.asset_key.to_string(),
                inspection_id: inspection.inspection_id.clone(),
                pipe_segment_reference: inspection.pipe_segment_reference.clone(),
                distance_m,
                clock_position: clock,
                coordinates: placement.coordinates,
                connection_point: placement.connection_point,
                stub_line: placement.stub_line,
                address: String::new(),
                geocode_status: GeocodeStatus::NotFound,
                direction: inspection.direction.clone(),
                upstream_manhole: inspection.upstream_manhole.clone(),
                downstream_manhole: inspection.downstream_manhole.clone(),
                defects: located,
                source: Source::Inspection,
                layer_name: None,
                tap_defect_id: None,
                tap_defect_code: None,
            },
        })
    }

    fn locate_defect(
        &self,
        geometry: &AssetGeometry,
        defect: &DefectRecord,
        inspection_imperial: bool,
    ) -> LocatedDefect {
        let distance_m = defect
            .distance
            .map(|d| to_meters(d, defect.imperial || inspection_imperial));
        let coordinates = distance_m
            .and_then(|d| self.projector.project(geometry, d, defect.clock_position).ok())
            .and_then(|p| self.validator.validate(&p));

        LocatedDefect {
            defect_id: defect.defect_id.clone(),
            code: defect.code.clone(),
            description: defect.description.clone(),
            grade: defect.grade.clone(),
            distance_m,
            clock_position: defect.clock_position,
            coordinates,
        }
    }

    fn draft_tap(
        &self,
        defect: &DefectRecord,
        assets: &AssetIndex<'_>,
        inspections: &InspectionIndex<'_>,
    ) -> Result<Draft<TapInspection>, SkippedRecord> {
        let inspection = defect
            .inspection_id
            .as_deref()
            .and_then(|id| inspections.get(id));

        let skip = |reason, asset_key: Option<&str>| SkippedRecord {
            kind: RecordKind::Tap,
            reference: defect.reference(),
            asset_key: asset_key.map(str::to_string),
            reason,
        };

        let asset = inspection
            .and_then(|i| assets.resolve_inspection(i))
            .or_else(|| assets.resolve(defect.pipe_segment_reference.as_deref(), None))
            .map(|(asset, _)| asset);
        let Some((asset, asset_key)) = asset.and_then(|a| a.key().map(|k| (a, k))) else {
            tracing::debug!(defect = %defect.reference(), "No asset matches tap defect");
            return Err(skip(SkipReason::UnresolvableJoin, None));
        };

        let distance = defect
            .distance
            .ok_or_else(|| skip(SkipReason::MissingTapDistance, Some(asset_key)))?;
        let imperial = defect.imperial || inspection.is_some_and(|i| i.imperial);
        let distance_m = to_meters(distance, imperial);
        let clock = defect.clock_position.unwrap_or(self.config.default_tap_clock);

        let placement = self
            .place(&asset.geometry, distance_m, clock)
            .map_err(|reason| skip(reason, Some(asset_key)))?;

        Ok(Draft {
            stub_fallback: placement.stub_line.is_none(),
            record: TapInspection {
                asset_key: asset_key.to_string(),
                defect_id: defect.defect_id.clone(),
                defect_code: defect.code.clone().unwrap_or_default(),
                inspection_id: defect
                    .inspection_id
                    .clone()
                    .or_else(|| inspection.and_then(|i| i.inspection_id.clone())),
                pipe_segment_reference: defect
                    .pipe_segment_reference
                    .clone()
                    .or_else(|| inspection.and_then(|i| i.pipe_segment_reference.clone())),
                distance_m,
                clock_position: clock,
                coordinates: placement.coordinates,
                connection_point: placement.connection_point,
                stub_line: placement.stub_line,
                address: String::new(),
                geocode_status: GeocodeStatus::NotFound,
            },
        })
    }
}

fn split_results<T>(
    results: Vec<Result<Draft<T>, SkippedRecord>>,
    skipped: &mut Vec<SkippedRecord>,
) -> Vec<Draft<T>> {
    let mut drafts = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(draft) => drafts.push(draft),
            Err(skip) => {
                tracing::debug!(
                    kind = ?skip.kind,
                    reference = %skip.reference,
                    reason = %skip.reason,
                    "Record skipped"
                );
                skipped.push(skip);
            }
        }
    }
    drafts
}
