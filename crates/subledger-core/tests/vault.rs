//! Integration tests for the token vault.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use common::{FakeMailbox, RefreshBehavior, cipher, connected_vault};
use subledger_core::{Database, Error, TokenVault, UserId};

async fn expired_vault(db: &Database, mailbox: &Arc<FakeMailbox>, user: UserId) -> TokenVault {
    let vault = TokenVault::new(db, Some(cipher()), Arc::clone(mailbox) as _);
    vault
        .store_credential(
            user,
            "refresh-initial",
            Some("access-stale"),
            Some(Utc::now() - Duration::minutes(5)),
        )
        .await
        .unwrap();
    vault
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let db = Database::in_memory().await.unwrap();
    let mailbox = Arc::new(FakeMailbox::with_refresh_delay(StdDuration::from_millis(50)));
    let user = UserId::new(1);
    let vault = Arc::new(expired_vault(&db, &mailbox, user).await);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let vault = Arc::clone(&vault);
            tokio::spawn(async move { vault.get_valid_access_token(user).await })
        })
        .collect();

    for handle in handles {
        let token = handle.await.unwrap().unwrap();
        assert_eq!(token.secret(), "access-1");
    }
    assert_eq!(mailbox.refresh_calls(), 1);
}

#[tokio::test]
async fn test_fresh_token_is_served_from_storage() {
    let db = Database::in_memory().await.unwrap();
    let mailbox = Arc::new(FakeMailbox::default());
    let user = UserId::new(1);
    let vault = connected_vault(&db, Arc::clone(&mailbox), user).await;

    let token = vault.get_valid_access_token(user).await.unwrap();
    assert_eq!(token.secret(), "access-initial");
    assert_eq!(mailbox.refresh_calls(), 0);
}

#[tokio::test]
async fn test_token_inside_safety_margin_is_refreshed() {
    let db = Database::in_memory().await.unwrap();
    let mailbox = Arc::new(FakeMailbox::default());
    let user = UserId::new(1);
    let vault = TokenVault::new(&db, Some(cipher()), Arc::clone(&mailbox) as _);
    vault
        .store_credential(
            user,
            "refresh-initial",
            Some("access-almost-expired"),
            Some(Utc::now() + Duration::seconds(30)),
        )
        .await
        .unwrap();

    let token = vault.get_valid_access_token(user).await.unwrap();
    assert_eq!(token.secret(), "access-1");

    // The refreshed token is cached.
    let again = vault.get_valid_access_token(user).await.unwrap();
    assert_eq!(again.secret(), "access-1");
    assert_eq!(mailbox.refresh_calls(), 1);
}

#[tokio::test]
async fn test_rejected_refresh_token_disconnects() {
    let db = Database::in_memory().await.unwrap();
    let mailbox = Arc::new(FakeMailbox::default());
    mailbox.set_refresh_behavior(RefreshBehavior::InvalidGrant);
    let user = UserId::new(1);
    let vault = expired_vault(&db, &mailbox, user).await;

    let err = vault.get_valid_access_token(user).await.unwrap_err();
    assert!(matches!(err, Error::AuthExpired(u) if u == user));
    assert!(!vault.status(user).await.unwrap().connected);

    let err = vault.get_valid_access_token(user).await.unwrap_err();
    assert!(matches!(err, Error::AuthExpired(_)));
    assert_eq!(mailbox.refresh_calls(), 1);
}

#[tokio::test]
async fn test_provider_outage_keeps_connection() {
    let db = Database::in_memory().await.unwrap();
    let mailbox = Arc::new(FakeMailbox::default());
    mailbox.set_refresh_behavior(RefreshBehavior::Unavailable);
    let user = UserId::new(1);
    let vault = expired_vault(&db, &mailbox, user).await;

    let err = vault.get_valid_access_token(user).await.unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable(_)));
    assert!(vault.status(user).await.unwrap().connected);

    mailbox.set_refresh_behavior(RefreshBehavior::Succeed);
    assert!(vault.get_valid_access_token(user).await.is_ok());
}

#[tokio::test]
async fn test_tokens_are_sealed_at_rest() {
    let db = Database::in_memory().await.unwrap();
    let mailbox = Arc::new(FakeMailbox::default());
    let user = UserId::new(1);
    connected_vault(&db, mailbox, user).await;

    let (refresh, access): (String, String) =
        sqlx::query_as("SELECT refresh_token, access_token FROM mailbox_credentials")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert!(refresh.starts_with("enc:v1:"));
    assert!(access.starts_with("enc:v1:"));
    assert!(!refresh.contains("refresh-initial"));
}

#[tokio::test]
async fn test_revoke_clears_tokens_and_keeps_watermark() {
    let db = Database::in_memory().await.unwrap();
    let mailbox = Arc::new(FakeMailbox::default());
    let user = UserId::new(1);
    let vault = connected_vault(&db, Arc::clone(&mailbox), user).await;
    let watermark = Utc::now() - Duration::days(1);
    vault.advance_watermark(user, watermark).await.unwrap();

    vault.revoke(user).await.unwrap();

    assert_eq!(mailbox.revoke_calls(), 1);
    let status = vault.status(user).await.unwrap();
    assert!(!status.connected);
    assert!(status.last_scan.is_some());
    assert!(matches!(
        vault.get_valid_access_token(user).await,
        Err(Error::AuthExpired(_))
    ));

    // Revoking again is a no-op.
    vault.revoke(user).await.unwrap();
}

#[tokio::test]
async fn test_store_requires_cipher_and_refresh_token() {
    let db = Database::in_memory().await.unwrap();
    let mailbox = Arc::new(FakeMailbox::default());
    let user = UserId::new(1);

    let keyless = TokenVault::new(&db, None, Arc::clone(&mailbox) as _);
    assert!(matches!(
        keyless.store_credential(user, "refresh", None, None).await,
        Err(Error::Configuration(_))
    ));

    let vault = TokenVault::new(&db, Some(cipher()), mailbox as _);
    assert!(matches!(
        vault.store_credential(user, "", None, None).await,
        Err(Error::InvalidInput(_))
    ));
}
