/// Blob serving endpoints
use crate::{
    blob_store::{DerivativeKey, OutputFormat, OutputOptions},
    content_id::ContentId,
    context::AppContext,
    error::{BlobError, BlobResult},
    metrics,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::time::Instant;

const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// Build blob routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/:identity/:cid", get(get_blob))
        .route("/:identity/:cid/inspect", get(inspect_blob))
}

/// Query parameters selecting the output representation
#[derive(Debug, Default, Deserialize)]
pub struct BlobQuery {
    pub format: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
}

impl BlobQuery {
    /// Parse into output options; empty values mean "not set"
    ///
    /// Dimensions above `max_dimension` are refused.
    pub fn into_options(self, max_dimension: u32) -> BlobResult<OutputOptions> {
        Ok(OutputOptions {
            format: self.format.as_deref().unwrap_or_default().parse()?,
            width: parse_dimension("width", self.width.as_deref(), max_dimension)?,
            height: parse_dimension("height", self.height.as_deref(), max_dimension)?,
        })
    }
}

fn parse_dimension(name: &str, value: Option<&str>, max: u32) -> BlobResult<u32> {
    let v = match value.map(str::trim) {
        None | Some("") => return Ok(0),
        Some(v) => v,
    };
    let parsed: u32 = v
        .parse()
        .map_err(|_| BlobError::InvalidRequest(format!("Invalid {}: {}", name, v)))?;
    if parsed > max {
        return Err(BlobError::InvalidRequest(format!(
            "{} {} exceeds the limit of {}",
            name, parsed, max
        )));
    }
    Ok(parsed)
}

/// ETag of one representation of a blob
///
/// Raw bytes are tagged by CID alone; derivatives by their cache file name.
fn etag_for(cid: &ContentId, options: &OutputOptions) -> String {
    if options.format == OutputFormat::Raw {
        return format!("\"{}\"", cid);
    }
    let key = DerivativeKey {
        cid: cid.clone(),
        format: options.format,
        width: options.width,
        height: options.height,
    };
    format!("\"{}\"", key.file_name())
}

/// Get a blob, or a derivative of it
///
/// Serves content with its content type, immutable caching headers and
/// Range request support.
async fn get_blob(
    State(ctx): State<AppContext>,
    Path((identity, cid)): Path<(String, String)>,
    Query(query): Query<BlobQuery>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let response = serve_blob(&ctx, &identity, &cid, query, &headers)
        .await
        .into_response();
    metrics::record_http_request(
        "/:identity/:cid",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn serve_blob(
    ctx: &AppContext,
    identity: &str,
    cid: &str,
    query: BlobQuery,
    headers: &HeaderMap,
) -> BlobResult<Response> {
    let options = query.into_options(ctx.config.transcode.max_dimension)?;
    let record = ctx.blob_store.get(identity, cid).await?;
    let etag = etag_for(&record.cid, &options);

    // Content behind a CID never changes, so a matching tag is always current
    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH) {
        if if_none_match.to_str().ok() == Some(etag.as_str()) {
            return Ok((
                StatusCode::NOT_MODIFIED,
                [
                    (header::ETAG, etag),
                    (header::CACHE_CONTROL, CACHE_CONTROL_IMMUTABLE.to_string()),
                ],
            )
                .into_response());
        }
    }

    let output = ctx.blob_store.output(identity, &record, options).await?;
    let total_size = output.data.len();
    let content_type = HeaderValue::from_str(&output.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    if let Some(range) = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, total_size))
    {
        let (start, end) = range;
        return Ok((
            StatusCode::PARTIAL_CONTENT,
            [
                (header::CONTENT_TYPE, content_type),
                (
                    header::CONTENT_RANGE,
                    header_value(format!("bytes {}-{}/{}", start, end, total_size)),
                ),
                (header::ETAG, header_value(etag)),
                (
                    header::CACHE_CONTROL,
                    HeaderValue::from_static(CACHE_CONTROL_IMMUTABLE),
                ),
                (header::ACCEPT_RANGES, HeaderValue::from_static("bytes")),
            ],
            Body::from(output.data.slice(start..=end)),
        )
            .into_response());
    }

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::ETAG, header_value(etag)),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static(CACHE_CONTROL_IMMUTABLE),
            ),
            (header::ACCEPT_RANGES, HeaderValue::from_static("bytes")),
        ],
        Body::from(output.data),
    )
        .into_response())
}

/// Header value from text we produced ourselves (CIDs, numbers)
fn header_value(value: String) -> HeaderValue {
    HeaderValue::try_from(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Dump the metadata of a blob as pretty JSON
async fn inspect_blob(
    State(ctx): State<AppContext>,
    Path((identity, cid)): Path<(String, String)>,
) -> Response {
    let started = Instant::now();
    let response = async {
        let inspection = ctx.blob_store.inspect(&identity, &cid).await?;
        let body = serde_json::to_string_pretty(&inspection)
            .map_err(|e| BlobError::Internal(format!("Failed to encode metadata: {}", e)))?;
        Ok::<_, BlobError>(([(header::CONTENT_TYPE, "application/json")], body))
    }
    .await
    .into_response();

    metrics::record_http_request(
        "/:identity/:cid/inspect",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Parse HTTP Range header
///
/// Returns (start, end) inclusive byte positions, or None if invalid
fn parse_range(range_header: &str, total_size: usize) -> Option<(usize, usize)> {
    // Expected format: "bytes=start-end" or "bytes=start-" or "bytes=-suffix"
    let range_spec = range_header.trim().strip_prefix("bytes=")?;
    if total_size == 0 {
        return None;
    }

    let (start_str, end_str) = range_spec.split_once('-')?;

    if start_str.is_empty() {
        // Suffix range: "bytes=-500" (last 500 bytes)
        let suffix = end_str.parse::<usize>().ok().filter(|s| *s > 0)?;
        return Some((total_size.saturating_sub(suffix), total_size - 1));
    }

    let start = start_str.parse::<usize>().ok().filter(|s| *s < total_size)?;
    if end_str.is_empty() {
        // Open-ended range: "bytes=500-" (from 500 to end)
        return Some((start, total_size - 1));
    }

    // Complete range: "bytes=500-999", end clamped to the content
    let end = end_str.parse::<usize>().ok()?.min(total_size - 1);
    (start <= end).then_some((start, end))
}
