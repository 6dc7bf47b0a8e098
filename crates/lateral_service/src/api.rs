use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{sync::Arc, time::Instant};

use lateral_core::{
    geojson, stats::SkippedRecord, validate_feature_collection, Assembler, ExportValidationReport,
    InputBatch, InputError, ProcessingStats,
};

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub assembler: Arc<Assembler>,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LateralRequest {
    pub assets: Value,
    pub inspections: Value,
    #[serde(default)]
    pub defects: Option<Value>,
    /// Promote taps into the laterals under this layer name.
    #[serde(default)]
    pub tap_layer_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExportReports {
    pub laterals: ExportValidationReport,
    pub taps: ExportValidationReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LateralResponse {
    pub laterals: Value,
    pub taps: Value,
    pub stats: ProcessingStats,
    pub skipped: Vec<SkippedRecord>,
    pub report: ExportReports,
}

pub struct ApiError(InputError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/v1/laterals", post(derive_laterals))
        .route("/healthz", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

async fn derive_laterals(
    State(state): State<AppState>,
    Json(req): Json<LateralRequest>,
) -> Result<Json<LateralResponse>, ApiError> {
    let started = Instant::now();

    let batch = match InputBatch::from_json(&req.assets, &req.inspections, req.defects.as_ref()) {
        Ok(batch) => batch,
        Err(e) => {
            tracing::info!(error = %e, "Rejected malformed batch");
            state.metrics.requests_total.with_label_values(&["bad_request"]).inc();
            return Err(ApiError(e));
        }
    };

    let mut assembly = state.assembler.run(&batch).await;
    if let Some(layer) = req.tap_layer_name.as_deref() {
        assembly.promote_taps(layer);
    }

    let laterals = geojson::laterals_to_geojson(&assembly.laterals);
    let taps = geojson::taps_to_geojson(&assembly.taps);
    let report = ExportReports {
        laterals: validate_feature_collection(&laterals),
        taps: validate_feature_collection(&taps),
    };

    let metrics = &state.metrics;
    metrics.observe_batch(&assembly.stats);
    metrics
        .geocode_cache_entries
        .set(state.assembler.geocoder().cache().len() as i64);
    metrics.requests_total.with_label_values(&["ok"]).inc();
    metrics
        .request_duration_seconds
        .observe(started.elapsed().as_secs_f64());

    Ok(Json(LateralResponse {
        laterals,
        taps,
        stats: assembly.stats,
        skipped: assembly.skipped,
        report,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use lateral_core::{AssemblerConfig, DisabledGeocoder};
    use tower::ServiceExt;

    fn app() -> Router {
        let state = AppState {
            assembler: Arc::new(Assembler::new(AssemblerConfig::default(), Arc::new(DisabledGeocoder))),
            metrics: Arc::new(Metrics::new().unwrap()),
        };
        router(state, 1 << 20)
    }

    async fn post_json(app: Router, body: Value) -> (StatusCode, Value) {
        let request = Request::post("/v1/laterals")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn derives_laterals_from_a_batch() {
        let body = json!({
            "assets": { "type": "FeatureCollection", "features": [{
                "type": "Feature",
                "properties": { "FID": 1 },
                "geometry": { "type": "LineString",
                              "coordinates": [[-80.19, 25.76], [-80.1895, 25.76]] }
            }]},
            "inspections": [{ "PipeSegmentReference": "1", "TapDistance": 10, "ClockPosition": 3 }],
            "defects": [{ "PipeSegmentReference": "1", "DefectCode": "TS", "Distance": 30, "ClockPosition": 9 }],
            "tapLayerName": "Taps"
        });

        let (status, out) = post_json(app(), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(out["laterals"]["features"].as_array().unwrap().len(), 2);
        assert_eq!(out["taps"]["features"].as_array().unwrap().len(), 1);
        assert_eq!(out["stats"]["processedCount"], 1);
        assert_eq!(out["stats"]["promotedTapCount"], 1);
        assert_eq!(out["report"]["laterals"]["errors"], json!([]));
    }

    #[tokio::test]
    async fn malformed_collections_are_bad_requests() {
        let (status, out) = post_json(app(), json!({ "assets": 42, "inspections": [] })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(out["error"].as_str().unwrap().contains("assets"));
    }

    #[tokio::test]
    async fn healthz_answers() {
        let response = app()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
