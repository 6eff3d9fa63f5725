//! Blob put/delete keyed by content digest.
//!
//! Keys are the lowercase hex digest (no extension, no path
//! sanitization), so identical content always lands on the same object
//! and a re-put is a harmless overwrite.

use opendal::Operator;

use casmir_core::{CasmirError, CasmirResult};

/// Store `data` under `key` with an explicit Content-Type.
/// PUT semantics are upsert: an existing object is overwritten.
pub async fn put_blob(
    op: &Operator,
    key: &str,
    data: Vec<u8>,
    content_type: &str,
) -> CasmirResult<()> {
    op.write_with(key, data)
        .content_type(content_type)
        .await
        .map_err(|e| CasmirError::Storage(format!("put {key}: {e}")))?;
    Ok(())
}

/// Remove the object at `key`. Deleting a missing object is not an error.
pub async fn delete_blob(op: &Operator, key: &str) -> CasmirResult<()> {
    op.delete(key)
        .await
        .map_err(|e| CasmirError::Storage(format!("delete {key}: {e}")))
}

pub async fn blob_exists(op: &Operator, key: &str) -> CasmirResult<bool> {
    op.exists(key)
        .await
        .map_err(|e| CasmirError::Storage(format!("stat {key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_operator() -> Operator {
        Operator::new(opendal::services::Memory::default())
            .expect("memory operator")
            .finish()
    }

    #[tokio::test]
    async fn put_then_exists_then_delete() {
        let op = memory_operator();
        let key = "a".repeat(64);

        assert!(!blob_exists(&op, &key).await.unwrap());
        put_blob(&op, &key, b"content".to_vec(), "text/plain")
            .await
            .unwrap();
        assert!(blob_exists(&op, &key).await.unwrap());

        delete_blob(&op, &key).await.unwrap();
        assert!(!blob_exists(&op, &key).await.unwrap());
    }

    #[tokio::test]
    async fn put_overwrites_existing_object() {
        let op = memory_operator();
        put_blob(&op, "k", b"one".to_vec(), "text/plain").await.unwrap();
        put_blob(&op, "k", b"two".to_vec(), "text/plain").await.unwrap();

        let data = op.read("k").await.unwrap();
        assert_eq!(data.to_bytes().as_ref(), b"two");
    }
}
