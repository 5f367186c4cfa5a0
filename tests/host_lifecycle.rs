//! Host lifecycle end to end: open/close cycles, session limits, and
//! crash recovery of in-flight edit sessions from their logs.

mod common;

use std::time::Duration;
use tabularium::auth::Authority;
use tabularium::domain::SourceSnapshot;
use tabularium::error::{CoreError, StateError};
use tabularium::model::{
    DomainAccessType, DomainFieldInfo, DomainItemKind, DomainRowInfo, FieldValue,
};
use tabularium::{HostState, RepoHost};

fn row(table: &str, key: i64) -> DomainRowInfo {
    DomainRowInfo {
        table_name: table.to_string(),
        fields: vec![DomainFieldInfo::from_value(&FieldValue::String(format!(
            "value-{key}"
        )))],
        keys: vec![DomainFieldInfo::from_value(&FieldValue::Int64(key))],
    }
}

#[tokio::test]
async fn test_host_reopens_on_the_same_storage() {
    let dir = tempfile::tempdir().unwrap();
    let host = RepoHost::new(common::config_in(dir.path())).unwrap();

    host.open().await.unwrap();
    assert_eq!(host.state(), HostState::Opened);
    let admin = host.login("admin", "admin").unwrap();
    host.logout(&admin).unwrap();
    host.close().await.unwrap();
    assert_eq!(host.state(), HostState::None);

    // Same storage, second life.
    host.open().await.unwrap();
    let admin = host.login("admin", "admin").unwrap();
    assert!(admin.is_admin());
    host.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_host_rejects_every_surface() {
    let dir = tempfile::tempdir().unwrap();
    let host = RepoHost::new(common::config_in(dir.path())).unwrap();

    assert!(matches!(
        host.login("admin", "admin").unwrap_err(),
        CoreError::State(StateError::HostNotOpen)
    ));
    assert!(host.users().is_err());
    assert!(host.domains().is_err());
    assert!(host.data_bases().is_err());
    assert!(host.repository().is_err());
}

#[tokio::test]
async fn test_session_limit_rolls_the_login_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::config_in(dir.path());
    config.limits.max_sessions = 2;
    let host = RepoHost::new(config).unwrap();
    host.open().await.unwrap();

    let admin = host.login("admin", "admin").unwrap();
    let users = host.users().unwrap();
    users
        .add_user(&admin, "bob", "Bob", "hunter2", Authority::Member)
        .unwrap();
    users
        .add_user(&admin, "eve", "Eve", "hunter2", Authority::Member)
        .unwrap();

    let _bob = host.login("bob", "hunter2").unwrap();
    let err = host.login("eve", "hunter2").unwrap_err();
    assert!(matches!(err, CoreError::LoginRejected(id) if id == "eve"));
    // The rejected session left nothing behind; freeing a slot lets eve in.
    assert_eq!(users.session_count(), 2);
    host.logout(&admin).unwrap();
    host.login("eve", "hunter2").unwrap();
    host.close().await.unwrap();
}

#[tokio::test]
async fn test_crash_recovery_replays_completed_edits() {
    let dir = tempfile::tempdir().unwrap();

    let domain_id = {
        let host = RepoHost::new(common::config_in(dir.path())).unwrap();
        host.open().await.unwrap();
        let admin = host.login("admin", "admin").unwrap();
        let data_base = host.data_bases().unwrap().create(&admin, "main").unwrap();

        let domain = host
            .create_domain(
                &admin,
                data_base.id(),
                "orders",
                DomainItemKind::TableContent,
                "/tables/",
                SourceSnapshot::default(),
            )
            .await
            .unwrap();
        domain.join(&admin, DomainAccessType::Write).await.unwrap();
        domain.attach().await.unwrap();
        for i in 0..10 {
            domain.new_row(&admin, vec![row("orders", i)]).await.unwrap();
        }
        // Give the log appends time to land, then walk away without
        // closing: the host "crashes" with the session still open.
        tokio::time::sleep(Duration::from_millis(100)).await;
        domain.domain_id()
    };

    let host = RepoHost::new(common::config_in(dir.path())).unwrap();
    host.open().await.unwrap();

    let domains = host.domains().unwrap();
    let restored = domains.get_domain(domain_id).unwrap();
    let snapshot = restored.snapshot().await.unwrap();
    assert_eq!(snapshot.rows.len(), 10);
    // Participation does not survive the restart.
    assert!(restored.users().await.unwrap().is_empty());
    host.close().await.unwrap();
}

#[tokio::test]
async fn test_clean_close_leaves_nothing_to_recover() {
    let dir = tempfile::tempdir().unwrap();

    {
        let host = RepoHost::new(common::config_in(dir.path())).unwrap();
        host.open().await.unwrap();
        let admin = host.login("admin", "admin").unwrap();
        let data_base = host.data_bases().unwrap().create(&admin, "main").unwrap();
        let domain = host
            .create_domain(
                &admin,
                data_base.id(),
                "orders",
                DomainItemKind::TableContent,
                "/tables/",
                SourceSnapshot::default(),
            )
            .await
            .unwrap();
        domain.join(&admin, DomainAccessType::Write).await.unwrap();
        domain.attach().await.unwrap();
        domain.new_row(&admin, vec![row("orders", 1)]).await.unwrap();
        host.close().await.unwrap();
    }

    let host = RepoHost::new(common::config_in(dir.path())).unwrap();
    host.open().await.unwrap();
    assert!(host.domains().unwrap().get_domains().is_empty());
    host.close().await.unwrap();
}
