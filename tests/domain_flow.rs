//! Collaborative edit sessions end to end: concurrent writers over one
//! domain serialize, independent domains run in parallel, and participant
//! churn keeps the session consistent.

mod common;

use tabularium::auth::Authority;
use tabularium::domain::SourceSnapshot;
use tabularium::error::{CoreError, PermissionError};
use tabularium::model::{
    DomainAccessType, DomainCallback, DomainFieldInfo, DomainItemKind, DomainRowInfo, FieldValue,
    RemoveReason,
};

fn row(table: &str, key: i64) -> DomainRowInfo {
    DomainRowInfo {
        table_name: table.to_string(),
        fields: vec![DomainFieldInfo::from_value(&FieldValue::String(format!(
            "value-{key}"
        )))],
        keys: vec![DomainFieldInfo::from_value(&FieldValue::Int64(key))],
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_serialize_on_one_domain() {
    let test = common::open_host().await;
    let admin = test.login_admin();
    let alice = test.login_user(&admin, "alice", Authority::Member);
    let bob = test.login_user(&admin, "bob", Authority::Member);

    let data_base = test.host.data_bases().unwrap().create(&admin, "main").unwrap();
    let domain = test
        .host
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
    domain.join(&alice, DomainAccessType::Write).await.unwrap();
    domain.join(&bob, DomainAccessType::Write).await.unwrap();
    domain.attach().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..25 {
        let (domain_a, alice) = (domain.clone(), alice.clone());
        tasks.push(tokio::spawn(async move {
            domain_a.new_row(&alice, vec![row("orders", i)]).await
        }));
        let (domain_b, bob) = (domain.clone(), bob.clone());
        tasks.push(tokio::spawn(async move {
            domain_b.new_row(&bob, vec![row("orders", 100 + i)]).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let snapshot = domain.snapshot().await.unwrap();
    assert_eq!(snapshot.rows.len(), 50);
    let (info, _) = domain.info().await.unwrap();
    assert!(info.modification_info.id == "alice" || info.modification_info.id == "bob");
    test.host.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_domains_run_in_parallel() {
    let test = common::open_host().await;
    let admin = test.login_admin();
    let alice = test.login_user(&admin, "alice", Authority::Member);

    let data_base = test.host.data_bases().unwrap().create(&admin, "main").unwrap();
    let domains = test.host.domains().unwrap();
    let mut handles = Vec::new();
    for name in ["orders", "users", "stock"] {
        let handle = domains
            .create(
                &alice,
                data_base.id(),
                name,
                DomainItemKind::TableContent,
                "/tables/",
                SourceSnapshot::default(),
            )
            .await
            .unwrap();
        handle.join(&alice, DomainAccessType::Write).await.unwrap();
        handle.attach().await.unwrap();
        handles.push((name, handle));
    }

    let mut tasks = Vec::new();
    for (name, handle) in &handles {
        for i in 0..20 {
            let (handle, alice, name) = (handle.clone(), alice.clone(), name.to_string());
            tasks.push(tokio::spawn(async move {
                handle.new_row(&alice, vec![row(&name, i)]).await
            }));
        }
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    for (_, handle) in &handles {
        assert_eq!(handle.snapshot().await.unwrap().rows.len(), 20);
    }
    test.host.close().await.unwrap();
}

#[tokio::test]
async fn test_participant_churn_keeps_session_consistent() {
    let test = common::open_host().await;
    let admin = test.login_admin();
    let alice = test.login_user(&admin, "alice", Authority::Member);
    let bob = test.login_user(&admin, "bob", Authority::Member);
    let eve = test.login_user(&admin, "eve", Authority::Guest);

    let data_base = test.host.data_bases().unwrap().create(&admin, "main").unwrap();
    let domains = test.host.domains().unwrap();
    let mut events = domains.subscribe();
    let domain = domains
        .create(
            &alice,
            data_base.id(),
            "orders",
            DomainItemKind::TableContent,
            "/tables/",
            SourceSnapshot::default(),
        )
        .await
        .unwrap();
    domain.join(&alice, DomainAccessType::Write).await.unwrap();
    domain.join(&bob, DomainAccessType::Write).await.unwrap();
    domain.join(&eve, DomainAccessType::Read).await.unwrap();
    domain.attach().await.unwrap();

    // The observer may look but not touch.
    let err = domain.new_row(&eve, vec![row("orders", 1)]).await.unwrap_err();
    assert!(matches!(err, CoreError::Permission(PermissionError::Denied)));

    domain.new_row(&alice, vec![row("orders", 1)]).await.unwrap();
    domain.kick(&alice, "bob", "inactive").await.unwrap();

    let users = domain.users().await.unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.iter().any(|(i, s)| i.user_id == "alice" && s.is_owner));

    domains.delete(&alice, domain.domain_id(), false).await.unwrap();

    let mut saw_kick = false;
    let mut last_index = None;
    while let Ok((info, callback)) = events.try_recv() {
        if let Some(previous) = last_index {
            assert!(info.index > previous);
        }
        last_index = Some(info.index);
        if let DomainCallback::UserRemoved { remove_info, user_id, .. } = &callback {
            if remove_info.reason == RemoveReason::Kick {
                assert_eq!(user_id, "bob");
                saw_kick = true;
            }
        }
    }
    assert!(saw_kick);
    test.host.close().await.unwrap();
}
