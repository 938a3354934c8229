use crate::db::*;
use tempfile::NamedTempFile;

/// Verify that using the database after closing the pool returns an error
/// rather than hanging or panicking.
#[tokio::test]
async fn test_context_access_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.register_session("before-close", true).await.unwrap();
    assert_eq!(db.session_ids().await.unwrap().len(), 1);

    db.pool().close().await;

    let result = db.load_context().await;
    assert!(
        result.is_err(),
        "load_context after pool close should return an error, got: {:?}",
        result
    );

    let result = db.register_session("after-close", false).await;
    assert!(result.is_err(), "writes after pool close must fail");
}
