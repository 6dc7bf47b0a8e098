use futures::future::BoxFuture;
use lateral_core::geocode::{GeocodeStatus, ADDRESS_NOT_FOUND, GEOCODING_FAILED};
use lateral_core::geodesy::{destination, haversine_m, initial_bearing_deg};
use lateral_core::{
    geojson, validate_feature_collection, Assembler, AssemblerConfig, DisabledGeocoder,
    GeocodeError, GeocodeResult, InputBatch, LngLat, ReverseGeocoder, SkipReason,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const START: LngLat = [-121.8453, 37.6789];

fn angle_diff(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// One 50 m sewer main heading due east, FID 1.
fn assets() -> Value {
    let end = destination(START, 50.0, 90.0);
    json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": { "FID": 1, "Material": "VCP" },
            "geometry": { "type": "LineString", "coordinates": [START, end] }
        }]
    })
}

fn assembler() -> Assembler {
    Assembler::new(AssemblerConfig::default(), Arc::new(DisabledGeocoder))
}

async fn run(inspections: Value, defects: Option<Value>) -> lateral_core::Assembly {
    let batch = InputBatch::from_json(&assets(), &inspections, defects.as_ref()).unwrap();
    assembler().run(&batch).await
}

#[tokio::test]
async fn single_lateral_lands_ten_metres_along_and_to_the_right() {
    let out = run(
        json!([{ "InspectionID": "I-1", "PipeSegmentReference": "1", "TapDistance": 10, "ClockPosition": 3 }]),
        None,
    )
    .await;

    assert_eq!(out.laterals.len(), 1);
    assert_eq!(out.stats.processed_count, 1);
    assert_eq!(out.stats.skipped_count, 0);

    let lateral = &out.laterals[0];
    assert_eq!(lateral.asset_key, "1");
    assert_eq!(lateral.address, ADDRESS_NOT_FOUND);
    assert_eq!(lateral.geocode_status, GeocodeStatus::NotFound);

    let connection = lateral.connection_point.unwrap();
    assert!((haversine_m(START, connection) - 10.0).abs() < 1e-3);

    // heading east, 3 o'clock is to the south
    let [from, to] = lateral.stub_line.unwrap();
    assert_eq!(from, connection);
    assert!((haversine_m(from, to) - 3.048).abs() < 1e-3);
    assert!(angle_diff(initial_bearing_deg(from, to), 180.0) < 0.01);

    assert!((haversine_m(connection, lateral.coordinates) - 2.0).abs() < 1e-3);
    assert!(lateral.coordinates[1] < connection[1]);
}

#[tokio::test]
async fn incomplete_and_unmatched_inspections_are_counted_not_emitted() {
    let out = run(
        json!({ "rows": [
            { "InspectionID": "no-distance", "PipeSegmentReference": "1", "ClockPosition": 3 },
            { "InspectionID": "no-clock", "PipeSegmentReference": "1", "TapDistance": 4 },
            { "InspectionID": "elsewhere", "PipeSegmentReference": "99", "TapDistance": 4, "ClockPosition": 9 },
            { "InspectionID": "ok", "PipeSegmentReference": "001", "TapDistance": 4, "ClockPosition": 9 }
        ]}),
        None,
    )
    .await;

    assert_eq!(out.laterals.len(), 1);
    assert_eq!(out.laterals[0].inspection_id.as_deref(), Some("ok"));
    assert_eq!(out.stats.skipped_count, 2);
    assert_eq!(out.stats.unmatched_inspections, 1);
    assert_eq!(out.stats.skipped_by_reason[&SkipReason::MissingTapDistance], 1);
    assert_eq!(out.stats.skipped_by_reason[&SkipReason::MissingClockPosition], 1);
    assert_eq!(out.stats.skipped_by_reason[&SkipReason::UnresolvableJoin], 1);
    assert_eq!(out.skipped.len(), 3);
}

#[tokio::test]
async fn imperial_distances_are_converted() {
    let out = run(
        json!([{ "PipeSegmentReference": "1", "TapDistance": "10", "ClockPosition": 3, "IsImperial": "yes" }]),
        None,
    )
    .await;

    let lateral = &out.laterals[0];
    assert!((lateral.distance_m - 3.048).abs() < 1e-9);
    assert!((haversine_m(START, lateral.connection_point.unwrap()) - 3.048).abs() < 1e-3);
}

#[tokio::test]
async fn defects_attach_and_taps_promote() {
    let out = run(
        json!([{ "InspectionID": "I-1", "PipeSegmentReference": "1", "TapDistance": 10, "ClockPosition": 3 }]),
        Some(json!([
            { "DefectID": "D-1", "InspectionID": "I-1", "DefectCode": "TFA", "Distance": 20, "ClockPosition": 9 },
            { "DefectID": "D-2", "InspectionID": "I-1", "DefectCode": "CL", "Distance": 5, "Grade": 2 },
            { "DefectID": "D-3", "InspectionID": "missing", "DefectCode": "TB", "Distance": 5 }
        ])),
    )
    .await;

    assert_eq!(out.laterals[0].defects.len(), 2);
    assert_eq!(out.stats.defect_count, 2);
    let crack = &out.laterals[0].defects[1];
    assert_eq!(crack.grade.as_deref(), Some("2"));
    assert!(crack.coordinates.is_some());

    assert_eq!(out.taps.len(), 1);
    assert_eq!(out.stats.unmatched_tap_defects, 1);
    let tap = &out.taps[0];
    assert_eq!(tap.defect_code, "TFA");
    assert_eq!(tap.asset_key, "1");
    assert!((haversine_m(START, tap.connection_point.unwrap()) - 20.0).abs() < 1e-3);
    // 9 o'clock on an eastbound main is north
    assert!(tap.coordinates[1] > tap.connection_point.unwrap()[1]);

    let mut out = out;
    assert_eq!(out.promote_taps("Taps"), 1);
    assert_eq!(out.laterals.len(), 2);
    assert_eq!(out.stats.promoted_tap_count, 1);
    let promoted = &out.laterals[1];
    assert_eq!(promoted.layer_name.as_deref(), Some("Taps"));
    assert_eq!(promoted.tap_defect_id.as_deref(), Some("D-1"));
}

#[tokio::test]
async fn exported_collections_pass_validation() {
    let out = run(
        json!([{ "PipeSegmentReference": "1", "TapDistance": 10, "ClockPosition": 3 }]),
        Some(json!([{ "InspectionID": "x", "PipeSegmentReference": "1", "DefectCode": "TS", "Distance": 1 }])),
    )
    .await;

    for collection in [
        geojson::laterals_to_geojson(&out.laterals),
        geojson::taps_to_geojson(&out.taps),
    ] {
        let report = validate_feature_collection(&collection);
        assert!(report.is_valid(), "{report:?}");
        assert_eq!(report.feature_count, 1);
        assert!(report.bbox.is_some());
    }
}

struct Stalled;

impl ReverseGeocoder for Stalled {
    fn reverse(&self, _lng: f64, _lat: f64) -> BoxFuture<'_, Result<GeocodeResult, GeocodeError>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(GeocodeError::Unavailable("never answers".into()))
        })
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_geocoder_does_not_stall_the_batch() {
    let batch = InputBatch::from_json(
        &assets(),
        &json!([{ "PipeSegmentReference": "1", "TapDistance": 10, "ClockPosition": 3 }]),
        None,
    )
    .unwrap();
    let assembler = Assembler::new(AssemblerConfig::default(), Arc::new(Stalled));

    let started = tokio::time::Instant::now();
    let out = assembler.run(&batch).await;

    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(out.laterals.len(), 1);
    assert_eq!(out.laterals[0].address, GEOCODING_FAILED);
    assert_eq!(out.laterals[0].geocode_status, GeocodeStatus::TimedOut);
    assert_eq!(out.stats.geocode_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn records_at_one_coordinate_share_a_single_geocode_timeout() {
    let row = json!({ "PipeSegmentReference": "1", "TapDistance": 10, "ClockPosition": 3 });
    let batch = InputBatch::from_json(&assets(), &json!([row, row, row, row]), None).unwrap();
    let assembler = Assembler::new(AssemblerConfig::default(), Arc::new(Stalled));

    let started = tokio::time::Instant::now();
    let out = assembler.run(&batch).await;

    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(out.laterals.len(), 4);
    assert!(out.laterals.iter().all(|l| l.address == GEOCODING_FAILED));
    assert_eq!(out.stats.geocode_failures, 4);
    assert!(assembler.geocoder().cache().is_empty());
}
