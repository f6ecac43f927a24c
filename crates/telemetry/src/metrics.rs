use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Recognition Pipeline Metrics ====
    pub static ref PLATE_IMAGES_PROCESSED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_images_processed_total",
                "Total number of images submitted to the recognition pipeline",
            ),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_DETECTIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_detections_total",
                "Total number of plate regions produced by the detector",
            ),
            &["class"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_EMPTY_CROPS: IntCounter = {
        let metric = IntCounter::new(
            "plate_empty_crops_total",
            "Detections whose crop had zero area and skipped text recognition",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_STAGE_LATENCY: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "plate_stage_latency_seconds",
                "Latency of each recognition pipeline stage",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 5.0]),
            &["stage"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Model Engine Metrics ====
    pub static ref PLATE_INFERENCE_TOTAL: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_inference_total",
                "Total number of model inference calls",
            ),
            &["model", "execution_provider"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_MODEL_POOL_WAITS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_model_pool_waits_total",
                "Calls that found every model instance busy and had to wait",
            ),
            &["model"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== History Store Metrics ====
    pub static ref PLATE_HISTORY_APPENDS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_history_appends_total",
                "Total number of history log appends",
            ),
            &["action", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}
