//! Metrics definitions for the content API.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS: MetricDef = MetricDef {
    name: "requests",
    metric_type: MetricType::Counter,
    description: "Number of handled requests. Tagged with route, status.",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with route, status.",
};

pub const INDEX_QUERY_DURATION: MetricDef = MetricDef {
    name: "index.query.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete an index lookup in seconds",
};

pub const PDF_STATUS_DURATION: MetricDef = MetricDef {
    name: "pdf.status.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a PDF status lookup in seconds",
};

pub const PDF_STATUS_FAILURES: MetricDef = MetricDef {
    name: "pdf.status.failures",
    metric_type: MetricType::Counter,
    description: "Number of failed PDF status lookups. Tagged with reason.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS,
    REQUEST_DURATION,
    INDEX_QUERY_DURATION,
    PDF_STATUS_DURATION,
    PDF_STATUS_FAILURES,
];
