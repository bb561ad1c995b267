//! Per-call metrics and error logging for the template facade.
//!
//! Every call is labelled with its RPC method and a short operation name.
//! Metrics go through the `metrics` facade; installing an exporter is left to
//! the embedding binary.

use std::future::Future;
use std::time::Instant;

use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::error::TemplateError;

pub const IN_FLIGHT: &str = "workflow_template_in_flight";
pub const REQUESTS_TOTAL: &str = "workflow_template_requests_total";
pub const ERRORS_TOTAL: &str = "workflow_template_errors_total";
pub const STALLS_TOTAL: &str = "workflow_template_stalls_total";
pub const HITS_TOTAL: &str = "workflow_template_hits_total";
pub const DURATION_SECONDS: &str = "workflow_template_duration_seconds";

/// Metric labels of one facade operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallLabels {
    pub method: &'static str,
    pub op: &'static str,
}

pub const CREATE: CallLabels = CallLabels {
    method: "CreateTemplate",
    op: "createtemplate",
};
pub const GET: CallLabels = CallLabels {
    method: "GetTemplate",
    op: "get",
};
pub const DELETE: CallLabels = CallLabels {
    method: "DeleteTemplate",
    op: "delete",
};
pub const LIST: CallLabels = CallLabels {
    method: "ListTemplates",
    op: "list",
};
pub const UPDATE: CallLabels = CallLabels {
    method: "UpdateTemplate",
    op: "updatetemplate",
};

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_gauge!(IN_FLIGHT, Unit::Count, "Template calls currently in progress");
    describe_counter!(REQUESTS_TOTAL, Unit::Count, "Template calls started");
    describe_counter!(ERRORS_TOTAL, Unit::Count, "Template calls that failed");
    describe_counter!(
        STALLS_TOTAL,
        Unit::Count,
        "List calls rejected because the store was not ready"
    );
    describe_counter!(HITS_TOTAL, Unit::Count, "List calls that completed");
    describe_histogram!(DURATION_SECONDS, Unit::Seconds, "Template call duration");
}

/// Tracks one call from start to drop.
///
/// Creating it bumps the in-flight gauge and the request counter. Dropping it
/// lowers the gauge and, once the timer runs, records the duration, whatever
/// path the call took.
#[derive(Debug)]
pub struct CallObserver {
    labels: CallLabels,
    started: Option<Instant>,
}

impl CallObserver {
    pub fn start(labels: CallLabels) -> Self {
        let mut observer = Self::untimed(labels);
        observer.start_timer();
        observer
    }

    /// Like [`CallObserver::start`], without the duration timer.
    pub fn untimed(labels: CallLabels) -> Self {
        gauge!(IN_FLIGHT, "method" => labels.method, "op" => labels.op).increment(1.0);
        counter!(REQUESTS_TOTAL, "method" => labels.method, "op" => labels.op).increment(1);
        Self {
            labels,
            started: None,
        }
    }

    pub fn start_timer(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Account for a failed call. The error itself is left untouched.
    pub fn fail(&self, err: &TemplateError) {
        let CallLabels { method, op } = self.labels;

        if let TemplateError::NotReady = err {
            counter!(STALLS_TOTAL, "method" => method, "op" => op).increment(1);
            tracing::warn!(method, op, "template store is not ready");
            return;
        }

        counter!(ERRORS_TOTAL, "method" => method, "op" => op).increment(1);
        match err.db_detail() {
            Some(db) => tracing::error!(
                method,
                op,
                error = %err,
                detail = %db.detail,
                location = %db.location,
                "template call failed"
            ),
            None => tracing::error!(method, op, error = %err, "template call failed"),
        }
    }

    pub fn record<T>(&self, result: &Result<T, TemplateError>) {
        if let Err(err) = result {
            self.fail(err);
        }
    }

    pub fn hit(&self) {
        counter!(HITS_TOTAL, "method" => self.labels.method, "op" => self.labels.op).increment(1);
    }
}

impl Drop for CallObserver {
    fn drop(&mut self) {
        let CallLabels { method, op } = self.labels;
        gauge!(IN_FLIGHT, "method" => method, "op" => op).decrement(1.0);
        if let Some(started) = self.started {
            histogram!(DURATION_SECONDS, "method" => method, "op" => op)
                .record(started.elapsed().as_secs_f64());
        }
    }
}

/// Run `call` under a [`CallObserver`].
pub async fn observed<T, F>(labels: CallLabels, call: F) -> Result<T, TemplateError>
where
    F: Future<Output = Result<T, TemplateError>>,
{
    let observer = CallObserver::start(labels);
    let result = call.await;
    observer.record(&result);
    result
}
