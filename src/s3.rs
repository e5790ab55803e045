// Thin wrapper over the AWS SDK for the three calls the pipeline needs.
// Credentials and region come from the default AWS provider chain.

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::sync::OnceCell;
use tracing::debug;

static CLIENT: OnceCell<Client> = OnceCell::const_new();

async fn client() -> &'static Client {
    CLIENT
        .get_or_init(|| async {
            let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            Client::new(&config)
        })
        .await
}

/// List every key under `prefix`, following pagination.
pub async fn list_keys(bucket: &str, prefix: &str) -> Result<Vec<String>, String> {
    list_keys_with(client().await, bucket, prefix, None).await
}

async fn list_keys_with(
    client: &Client,
    bucket: &str,
    prefix: &str,
    page_size: Option<i32>,
) -> Result<Vec<String>, String> {
    let mut pages = client
        .list_objects_v2()
        .bucket(bucket)
        .prefix(prefix)
        .set_max_keys(page_size)
        .into_paginator()
        .send();

    let mut keys = Vec::new();
    let mut page_count = 0;
    while let Some(page) = pages.next().await {
        let page = page.map_err(|e| DisplayErrorContext(&e).to_string())?;
        keys.extend(page_keys(&page));
        page_count += 1;
    }
    debug!(
        "Listed {} keys under s3://{}/{} in {} pages",
        keys.len(),
        bucket,
        prefix,
        page_count
    );
    Ok(keys)
}

// Entries without a key are skipped
fn page_keys(page: &ListObjectsV2Output) -> impl Iterator<Item = String> + '_ {
    page.contents()
        .iter()
        .filter_map(|object| object.key().map(str::to_string))
}

fn is_missing_key(error: &GetObjectError) -> bool {
    error.is_no_such_key()
}

/// Fetch an object. `Ok(None)` when the key does not exist.
pub async fn get_object(bucket: &str, key: &str) -> Result<Option<Vec<u8>>, String> {
    get_object_with(client().await, bucket, key).await
}

async fn get_object_with(client: &Client, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, String> {
    let output = match client.get_object().bucket(bucket).key(key).send().await {
        Ok(output) => output,
        Err(e) => {
            if e.as_service_error().is_some_and(is_missing_key) {
                return Ok(None);
            }
            return Err(DisplayErrorContext(&e).to_string());
        }
    };
    let bytes = output
        .body
        .collect()
        .await
        .map_err(|e| e.to_string())?
        .into_bytes();
    Ok(Some(bytes.to_vec()))
}

pub async fn put_object(bucket: &str, key: &str, body: Vec<u8>) -> Result<(), String> {
    put_object_with(client().await, bucket, key, body).await
}

async fn put_object_with(client: &Client, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), String> {
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .send()
        .await
        .map_err(|e| DisplayErrorContext(&e).to_string())?;
    Ok(())
}
