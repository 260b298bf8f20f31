// src/storage/tests/mod.rs


// Contract checks that every RemoteStore backend must pass
pub(crate) mod common {
    use crate::error::{ErrorKind, OpError};
    use crate::storage::{Operation, RemoteStore, Response, StoreResult};

    pub async fn test_document_lifecycle(store: &dyn RemoteStore, path: &str) -> StoreResult<()> {
        // Missing documents read as None
        assert_eq!(store.get(path).await?, None);

        store.set(path, b"v1").await?;
        assert_eq!(store.get(path).await?.as_deref(), Some(&b"v1"[..]));

        // Set replaces unconditionally
        store.set(path, b"v2").await?;
        assert_eq!(store.get(path).await?.as_deref(), Some(&b"v2"[..]));

        store.update(path, b"v3").await?;
        assert_eq!(store.get(path).await?.as_deref(), Some(&b"v3"[..]));

        assert!(store.delete(path).await?);
        assert!(!store.delete(path).await?);
        assert_eq!(store.get(path).await?, None);

        Ok(())
    }

    pub async fn test_update_requires_existing(store: &dyn RemoteStore, path: &str) -> StoreResult<()> {
        let err = store.update(path, b"nope").await.unwrap_err();
        assert_eq!(err, OpError::not_found(path));
        assert_eq!(err.kind(), ErrorKind::Permanent);

        // The failed update must not have created anything
        assert_eq!(store.get(path).await?, None);
        Ok(())
    }

    pub async fn test_operations_apply(store: &dyn RemoteStore, path: &str) -> StoreResult<()> {
        let written = Operation::write(path, b"payload".to_vec()).apply(store).await?;
        assert_eq!(written, Response::Written);

        let read = Operation::read(path).apply(store).await?;
        assert_eq!(read.into_document(), Some(b"payload".to_vec()));

        let updated = Operation::update(path, b"next".to_vec()).apply(store).await?;
        assert_eq!(updated, Response::Updated);

        let deleted = Operation::delete(path).apply(store).await?;
        assert_eq!(deleted, Response::Deleted(true));
        Ok(())
    }
}
