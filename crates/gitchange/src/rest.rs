//! REST integrations: each entry issues a request, runs the expression
//! pipeline, and yields at most one file.
//!
//! Every stage records its metric before the tick can fail, so a dashboard
//! sees exactly how far each entry got. A false condition (or a non-2xx
//! status) is not an error: the entry simply contributes nothing this tick.

use std::time::Instant;

use gitchange_expr::Env;

use crate::Error;
use crate::api::RestApiSpec;
use crate::config::ControllerKind;
use crate::content::FileEntry;
use crate::metrics::{
    CONDITION_HTTP_STATUS_FAILED, CONDITION_JSON_FAILED, CONDITION_SUCCESS,
    ERROR_CONDITION_EXTRACTION_FAILED, ERROR_DATA_EXTRACTION_FAILED, ERROR_PROCESSING_FAILED,
    metrics,
};

/// Run all REST entries of a spec in declaration order.
pub async fn run_entries(
    http: &reqwest::Client,
    controller: ControllerKind,
    entries: &[RestApiSpec],
    now: i64,
    fuel: u64,
) -> Result<Vec<FileEntry>, Error> {
    let mut files = Vec::new();
    for entry in entries {
        if let Some(file) = run_entry(http, controller, entry, now, fuel).await? {
            files.push(file);
        }
    }
    Ok(files)
}

async fn run_entry(
    http: &reqwest::Client,
    controller: ControllerKind,
    entry: &RestApiSpec,
    now: i64,
    fuel: u64,
) -> Result<Option<FileEntry>, Error> {
    let label = controller.label();
    let method = entry.method.to_uppercase();
    let parsed_method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| Error::Validation(format!("restAPI {:?}: bad method {method:?}", entry.name)))?;

    let mut request = http.request(parsed_method, &entry.url);
    for (name, value) in &entry.headers {
        request = request.header(name, value);
    }
    if let Some(body) = &entry.body {
        request = request.body(body.clone());
    }

    let started = Instant::now();
    let response = request.send().await;
    metrics()
        .rest_request_duration
        .with_label_values(&[label, &entry.url, &method])
        .observe(started.elapsed().as_secs_f64());

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            metrics()
                .rest_requests
                .with_label_values(&[label, &entry.url, &method, "error"])
                .inc();
            return Err(Error::Http(format!("restAPI {:?}: {e}", entry.name)));
        }
    };

    let status = response.status();
    metrics()
        .rest_requests
        .with_label_values(&[label, &entry.url, &method, status.as_str()])
        .inc();

    let body = response
        .bytes()
        .await
        .map_err(|e| Error::Http(format!("restAPI {:?}: reading body: {e}", entry.name)))?;
    metrics()
        .rest_response_size
        .with_label_values(&[label, &entry.url])
        .observe(body.len() as f64);

    if !status.is_success() {
        tracing::warn!(entry = %entry.name, status = %status, "rest entry skipped, http status check failed");
        metrics()
            .condition_checks
            .with_label_values(&[label, CONDITION_HTTP_STATUS_FAILED])
            .inc();
        return Ok(None);
    }

    let document: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        metrics()
            .json_parsing_errors
            .with_label_values(&[label, ERROR_PROCESSING_FAILED])
            .inc();
        Error::JsonParse(format!("restAPI {:?}: {e}", entry.name))
    })?;

    let env = Env::new(now).with_fuel(fuel).with_var("response", document);

    let condition = gitchange_expr::check_condition(&env, &entry.condition).map_err(|e| {
        metrics()
            .json_parsing_errors
            .with_label_values(&[label, ERROR_CONDITION_EXTRACTION_FAILED])
            .inc();
        Error::Expr(e)
    })?;
    if !condition {
        metrics()
            .condition_checks
            .with_label_values(&[label, CONDITION_JSON_FAILED])
            .inc();
        return Ok(None);
    }
    metrics()
        .condition_checks
        .with_label_values(&[label, CONDITION_SUCCESS])
        .inc();

    let data = gitchange_expr::extract_data(&env, &entry.data_expression).map_err(|e| {
        metrics()
            .json_parsing_errors
            .with_label_values(&[label, ERROR_DATA_EXTRACTION_FAILED])
            .inc();
        Error::Expr(e)
    })?;

    let output =
        gitchange_expr::format_output(&env, &entry.output_format, &data, entry.include_timestamp)
            .map_err(|e| {
                metrics()
                    .json_parsing_errors
                    .with_label_values(&[label, ERROR_DATA_EXTRACTION_FAILED])
                    .inc();
                Error::Expr(e)
            })?;

    Ok(Some(FileEntry::new(
        entry.output_path.clone(),
        output.into_bytes(),
        entry.write_mode,
    )))
}
