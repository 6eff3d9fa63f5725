//! OpenDAL Operator factory for the blob bucket

use anyhow::{Context, Result};
use opendal::Operator;

use casmir_core::config::Config;

/// Build an OpenDAL Operator for any S3-compatible endpoint.
///
/// Uses path-style addressing (default in opendal 0.55), which is what
/// MinIO and SeaweedFS expect. Do NOT call enable_virtual_host_style()
/// for these.
pub fn build_operator(cfg: &Config) -> Result<Operator> {
    if cfg.s3_endpoint.starts_with("http://") {
        tracing::warn!(
            endpoint = %cfg.s3_endpoint,
            "S3 endpoint uses plaintext HTTP — credentials are transmitted unencrypted"
        );
    }

    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`)
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.s3_endpoint)
        .region(&cfg.s3_region)
        .bucket(&cfg.s3_bucket)
        .access_key_id(&cfg.s3_access_key_id)
        .secret_access_key(&cfg.s3_secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}
