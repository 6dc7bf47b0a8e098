use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::info;

use lateral_core::{
    geojson, validate_feature_collection, Assembler, AssemblerConfig, DisabledGeocoder,
    ExportValidationReport, InputBatch, ProcessingStats,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "lateralgen", version, about = "Derive lateral connection GeoJSON from pipe assets and inspections")]
struct Args {
    /// Pipe asset FeatureCollection (GeoJSON).
    #[arg(long, env = "LATERAL_ASSETS")]
    assets: PathBuf,

    /// Inspection rows (JSON array, or an object with a `rows` array).
    #[arg(long, env = "LATERAL_INSPECTIONS")]
    inspections: PathBuf,

    /// Defect rows; tap codes (TB/TF/TS) become taps.
    #[arg(long, env = "LATERAL_DEFECTS")]
    defects: Option<PathBuf>,

    /// Also emit every tap as a lateral on this layer.
    #[arg(long, env = "LATERAL_TAP_LAYER_NAME")]
    tap_layer_name: Option<String>,

    #[arg(long, env = "LATERAL_OUTPUT_DIR", default_value = "out")]
    output_dir: PathBuf,

    /// Stub length in metres (default 10 ft)
    #[arg(long, default_value_t = 3.048)]
    stub_length_m: f64,

    /// Perpendicular offset of the lateral point from a line asset, metres
    #[arg(long, default_value_t = 2.0)]
    lateral_offset_m: f64,

    #[arg(long, default_value_t = 5000)]
    geocode_timeout_ms: u64,
}

impl Args {
    fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            stub_length_m: self.stub_length_m,
            lateral_offset_m: self.lateral_offset_m,
            geocode_timeout: Duration::from_millis(self.geocode_timeout_ms),
            ..AssemblerConfig::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    stats: ProcessingStats,
    laterals: ExportValidationReport,
    taps: ExportValidationReport,
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

async fn run(args: &Args) -> Result<Report> {
    let assets = read_json(&args.assets)?;
    let inspections = read_json(&args.inspections)?;
    let defects = args.defects.as_deref().map(read_json).transpose()?;

    let batch = InputBatch::from_json(&assets, &inspections, defects.as_ref())
        .context("input does not have the expected shape")?;
    info!(
        assets = batch.assets.len(),
        inspections = batch.inspections.len(),
        defects = batch.defects.len(),
        "Loaded input"
    );

    // no network geocoder in batch mode; addresses fall back to the placeholder
    let assembler = Assembler::new(args.assembler_config(), Arc::new(DisabledGeocoder));
    let mut assembly = assembler.run(&batch).await;

    if let Some(layer) = args.tap_layer_name.as_deref() {
        let n = assembly.promote_taps(layer);
        info!(layer, promoted = n, "Promoted taps to laterals");
    }

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let laterals = geojson::laterals_to_geojson(&assembly.laterals);
    let taps = geojson::taps_to_geojson(&assembly.taps);
    write_json(&args.output_dir.join("laterals.geojson"), &laterals)?;
    write_json(&args.output_dir.join("taps.geojson"), &taps)?;

    let report = Report {
        stats: assembly.stats,
        laterals: validate_feature_collection(&laterals),
        taps: validate_feature_collection(&taps),
    };
    write_json(&args.output_dir.join("report.json"), &report)?;

    for issue in report.laterals.errors.iter().chain(&report.taps.errors) {
        tracing::warn!(feature = ?issue.feature_index, "{}", issue.message);
    }

    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let started = Instant::now();
    let report = run(&args).await?;

    info!(
        laterals = report.stats.processed_count + report.stats.promoted_tap_count,
        taps = report.stats.tap_count,
        skipped = report.stats.skipped_count,
        unmatched = report.stats.unmatched_inspections,
        output = %args.output_dir.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Done"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, value: Value) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, value.to_string()).unwrap();
        path
    }

    fn args(dir: &Path) -> Args {
        let assets = write(
            dir,
            "assets.geojson",
            json!({ "type": "FeatureCollection", "features": [{
                "type": "Feature",
                "properties": { "FID": 7 },
                "geometry": { "type": "LineString",
                              "coordinates": [[-121.8453, 37.6789], [-121.8447, 37.6789]] }
            }]}),
        );
        let inspections = write(
            dir,
            "inspections.json",
            json!([{ "InspectionID": "A", "PipeSegmentReference": "7", "TapDistance": 12, "ClockPosition": 9 }]),
        );
        let defects = write(
            dir,
            "defects.json",
            json!({ "rows": [{ "DefectID": "T1", "InspectionID": "A", "DefectCode": "TB", "Distance": 20 }] }),
        );

        let out = dir.join("out");
        let path = |p: &Path| p.to_str().unwrap().to_string();
        Args::parse_from([
            "lateralgen".to_string(),
            "--assets".into(),
            path(assets.as_path()),
            "--inspections".into(),
            path(inspections.as_path()),
            "--defects".into(),
            path(defects.as_path()),
            "--tap-layer-name".into(),
            "Taps".into(),
            "--output-dir".into(),
            path(out.as_path()),
        ])
    }

    #[tokio::test]
    async fn writes_all_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path());

        let report = run(&args).await.unwrap();
        assert_eq!(report.stats.processed_count, 1);
        assert_eq!(report.stats.tap_count, 1);
        assert_eq!(report.stats.promoted_tap_count, 1);
        assert!(report.laterals.is_valid());

        let laterals = read_json(&args.output_dir.join("laterals.geojson")).unwrap();
        assert_eq!(laterals["features"].as_array().unwrap().len(), 2);
        assert_eq!(laterals["features"][1]["properties"]["layerName"], "Taps");
        assert_eq!(laterals["features"][0]["properties"]["address"], "Address not found");

        let written = read_json(&args.output_dir.join("report.json")).unwrap();
        assert_eq!(written["stats"]["processedCount"], 1);
        assert_eq!(written["taps"]["featureCount"], 1);
    }

    #[tokio::test]
    async fn missing_input_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path());
        args.inspections = dir.path().join("nope.json");

        let err = run(&args).await.unwrap_err();
        assert!(format!("{err:#}").contains("nope.json"));
    }
}
