//! Coordination Module Tests
//!
//! ## Test Scopes
//! - **MemoryKeeper**: Node semantics, multi atomicity, sessions and ephemerals.
//! - **Fault injection**: Injected codes, connection loss and session reaping.
//! - **Client helpers**: Ancestor creation and recursive removal.
//! - **HTTP transport**: A `RemoteKeeper` talking to the axum router.

#[cfg(test)]
mod tests {
    use crate::coordination::client::{
        Connector, KeeperClient, create_ancestors, create_if_not_exists, join_path,
        remove_children_recursive, remove_recursive, validate_path,
    };
    use crate::coordination::handlers::{KeeperServerState, router};
    use crate::coordination::memory::MemoryKeeper;
    use crate::coordination::remote::RemoteConnector;
    use crate::coordination::types::{Code, CreateMode, Op, OpResult};
    use std::time::Duration;

    // ============================================================
    // MEMORY KEEPER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_create_get_set_remove() {
        let keeper = MemoryKeeper::new();
        let client = keeper.session();

        client
            .create("/a", b"one".to_vec(), CreateMode::Persistent)
            .await
            .unwrap();
        let (data, stat) = client.get("/a").await.unwrap();
        assert_eq!(data, b"one".to_vec());
        assert_eq!(stat.version, 0);

        let stat = client.set("/a", b"two".to_vec(), None).await.unwrap();
        assert_eq!(stat.version, 1);
        assert_eq!(stat.data_length, 3);

        let err = client.set("/a", b"x".to_vec(), Some(0)).await.unwrap_err();
        assert_eq!(err.code, Code::BadVersion);

        client.remove("/a", Some(1)).await.unwrap();
        assert!(client.exists("/a").await.unwrap().is_none());
        assert_eq!(client.get("/a").await.unwrap_err().code, Code::NoNode);
    }

    #[tokio::test]
    async fn test_create_requires_parent_and_rejects_duplicates() {
        let keeper = MemoryKeeper::new();
        let client = keeper.session();

        let err = client
            .create("/missing/child", vec![], CreateMode::Persistent)
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::NoNode);

        client.create("/a", vec![], CreateMode::Persistent).await.unwrap();
        let err = client
            .create("/a", vec![], CreateMode::Persistent)
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::NodeExists);
    }

    #[tokio::test]
    async fn test_remove_non_empty_fails() {
        let keeper = MemoryKeeper::new();
        let client = keeper.session();
        client.create("/a", vec![], CreateMode::Persistent).await.unwrap();
        client.create("/a/b", vec![], CreateMode::Persistent).await.unwrap();

        let err = client.remove("/a", None).await.unwrap_err();
        assert_eq!(err.code, Code::NotEmpty);

        let stat = client.exists("/a").await.unwrap().unwrap();
        assert_eq!(stat.num_children, 1);
        assert_eq!(client.children("/a").await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_multi_is_all_or_nothing() {
        // ARRANGE
        let keeper = MemoryKeeper::new();
        let client = keeper.session();
        client.create("/a", b"v".to_vec(), CreateMode::Persistent).await.unwrap();

        // ACT: third op fails, first two must be undone
        let err = client
            .multi(vec![
                Op::create("/b", vec![], CreateMode::Persistent),
                Op::set("/a", b"changed".to_vec(), None),
                Op::create("/a", vec![], CreateMode::Persistent),
            ])
            .await
            .unwrap_err();

        // ASSERT
        assert_eq!(err.code, Code::NodeExists);
        assert_eq!(err.index, 2);
        assert!(!keeper.node_exists("/b"));
        let (data, stat) = client.get("/a").await.unwrap();
        assert_eq!(data, b"v".to_vec());
        assert_eq!(stat.version, 0);
    }

    #[tokio::test]
    async fn test_multi_success_results() {
        let keeper = MemoryKeeper::new();
        let client = keeper.session();

        let results = client
            .multi(vec![
                Op::create("/a", vec![], CreateMode::Persistent),
                Op::check("/a", Some(0)),
                Op::set("/a", b"x".to_vec(), Some(0)),
                Op::create("/a/b", vec![], CreateMode::Persistent),
                Op::remove("/a/b", None),
            ])
            .await
            .unwrap();

        assert_eq!(
            results[0],
            OpResult::Created {
                path: "/a".to_string()
            }
        );
        assert_eq!(results[1], OpResult::Checked);
        assert!(matches!(&results[2], OpResult::Set(stat) if stat.version == 1));
        assert_eq!(results[4], OpResult::Removed);
        assert_eq!(keeper.child_count("/a"), Some(0));
    }

    #[tokio::test]
    async fn test_multi_remove_then_recreate_rolls_back_in_order() {
        let keeper = MemoryKeeper::new();
        let client = keeper.session();
        client.create("/a", b"orig".to_vec(), CreateMode::Persistent).await.unwrap();

        let err = client
            .multi(vec![
                Op::remove("/a", None),
                Op::create("/a", b"new".to_vec(), CreateMode::Persistent),
                Op::check("/nope", None),
            ])
            .await
            .unwrap_err();

        assert_eq!(err.code, Code::NoNode);
        assert_eq!(err.path, "/nope");
        assert_eq!(client.get("/a").await.unwrap().0, b"orig".to_vec());
    }

    // ============================================================
    // SESSION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_ephemeral_nodes_die_with_session() {
        // ARRANGE
        let keeper = MemoryKeeper::new();
        let owner = keeper.session();
        let observer = keeper.session();
        owner.create("/lock", vec![], CreateMode::Ephemeral).await.unwrap();

        let stat = observer.exists("/lock").await.unwrap().unwrap();
        assert_eq!(stat.ephemeral_owner, Some(owner.session_id()));

        // ACT
        keeper.expire_session(owner.session_id());

        // ASSERT
        assert!(owner.expired());
        assert!(observer.exists("/lock").await.unwrap().is_none());
        let err = owner.exists("/lock").await.unwrap_err();
        assert_eq!(err.code, Code::SessionExpired);
    }

    #[tokio::test]
    async fn test_ephemeral_cannot_have_children() {
        let keeper = MemoryKeeper::new();
        let client = keeper.session();
        client.create("/e", vec![], CreateMode::Ephemeral).await.unwrap();

        let err = client
            .create("/e/child", vec![], CreateMode::Persistent)
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::NoChildrenForEphemerals);
    }

    #[tokio::test]
    async fn test_dropping_client_closes_session() {
        let keeper = MemoryKeeper::new();
        let client = keeper.session();
        let id = client.session_id();
        client.create("/e", vec![], CreateMode::Ephemeral).await.unwrap();

        drop(client);

        assert!(!keeper.session_alive(id));
        assert!(!keeper.node_exists("/e"));
    }

    #[tokio::test]
    async fn test_reaper_expires_idle_tracked_sessions() {
        let keeper = MemoryKeeper::new();
        let tracked = keeper.open_session(true);
        let untracked = keeper.open_session(false);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let reaped = keeper.reap_idle_sessions(Duration::from_millis(10));

        assert_eq!(reaped, vec![tracked]);
        assert!(!keeper.session_alive(tracked));
        assert!(keeper.session_alive(untracked));
        assert_eq!(keeper.heartbeat(tracked), Err(Code::SessionExpired));
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_session_alive() {
        let keeper = MemoryKeeper::new();
        let tracked = keeper.open_session(true);

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            keeper.heartbeat(tracked).unwrap();
        }

        assert!(keeper.reap_idle_sessions(Duration::from_millis(25)).is_empty());
    }

    // ============================================================
    // FAULT INJECTION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_injected_fault_fires_requested_times() {
        let keeper = MemoryKeeper::new();
        let client = keeper.session();
        keeper.inject_fault("/a", Code::OperationTimeout, 2);

        for _ in 0..2 {
            let err = client.exists("/a").await.unwrap_err();
            assert_eq!(err.code, Code::OperationTimeout);
        }
        assert!(client.exists("/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_fault_in_multi_reports_index() {
        let keeper = MemoryKeeper::new();
        let client = keeper.session();
        keeper.inject_fault("/b", Code::ConnectionLoss, 1);

        let err = client
            .multi(vec![
                Op::create("/a", vec![], CreateMode::Persistent),
                Op::create("/b", vec![], CreateMode::Persistent),
            ])
            .await
            .unwrap_err();

        assert_eq!(err.code, Code::ConnectionLoss);
        assert_eq!(err.index, 1);
        assert!(!keeper.node_exists("/a"));
    }

    #[tokio::test]
    async fn test_connection_loss_blocks_requests_and_connects() {
        let keeper = MemoryKeeper::new();
        let client = keeper.session();

        keeper.set_connection_loss(true);
        assert_eq!(
            client.exists("/").await.unwrap_err().code,
            Code::ConnectionLoss
        );
        assert!(keeper.connect().await.is_err());

        keeper.set_connection_loss(false);
        assert!(client.exists("/").await.unwrap().is_some());
        assert!(keeper.connect().await.is_ok());
    }

    // ============================================================
    // CLIENT HELPER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_create_ancestors_and_recursive_removal() {
        let keeper = MemoryKeeper::new();
        let client = keeper.session();

        create_ancestors(client.as_ref(), "/a/b/c").await.unwrap();
        assert!(keeper.node_exists("/a/b"));
        assert!(!keeper.node_exists("/a/b/c"));

        create_if_not_exists(client.as_ref(), "/a/b/c").await.unwrap();
        create_if_not_exists(client.as_ref(), "/a/b/c").await.unwrap();
        create_if_not_exists(client.as_ref(), "/a/keep").await.unwrap();

        remove_children_recursive(client.as_ref(), "/a", Some("keep"))
            .await
            .unwrap();
        assert!(!keeper.node_exists("/a/b"));
        assert!(keeper.node_exists("/a/keep"));

        remove_recursive(client.as_ref(), "/a").await.unwrap();
        assert!(!keeper.node_exists("/a"));

        // Already gone
        remove_recursive(client.as_ref(), "/a").await.unwrap();
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a", "b"), "/a/b");

        assert!(validate_path("/").is_ok());
        assert!(validate_path("/a/b").is_ok());
        assert!(validate_path("a").is_err());
        assert!(validate_path("/a/").is_err());
        assert!(validate_path("/a//b").is_err());
    }

    // ============================================================
    // HTTP TRANSPORT TESTS
    // ============================================================

    async fn spawn_server(keeper: MemoryKeeper, session_timeout: Duration) -> String {
        let app = router(KeeperServerState::new(keeper, session_timeout));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_remote_keeper_round_trip() {
        // ARRANGE
        let keeper = MemoryKeeper::new();
        let url = spawn_server(keeper.clone(), Duration::from_secs(10)).await;
        let connector = RemoteConnector::new(&url, Duration::from_secs(2));

        // ACT
        let client = connector.connect().await.unwrap();
        client
            .create("/remote", b"hello".to_vec(), CreateMode::Persistent)
            .await
            .unwrap();
        client
            .create("/remote/e", vec![], CreateMode::Ephemeral)
            .await
            .unwrap();

        // ASSERT: state is visible on the server side
        assert!(keeper.node_exists("/remote"));
        assert_eq!(client.get("/remote").await.unwrap().0, b"hello".to_vec());
        assert_eq!(
            client.children("/remote").await.unwrap(),
            vec!["e".to_string()]
        );

        let err = client
            .create("/remote", vec![], CreateMode::Persistent)
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::NodeExists);

        let err = client
            .multi(vec![
                Op::remove("/remote/e", None),
                Op::remove("/missing", None),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::NoNode);
        assert_eq!(err.index, 1);
        assert!(keeper.node_exists("/remote/e"));

        client.sync("/remote").await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_session_expiry_is_observed() {
        let keeper = MemoryKeeper::new();
        let url = spawn_server(keeper.clone(), Duration::from_secs(10)).await;
        let connector = RemoteConnector::new(&url, Duration::from_secs(2));

        let client = connector.connect().await.unwrap();
        keeper.expire_session(client.session_id());

        let err = client.exists("/").await.unwrap_err();
        assert_eq!(err.code, Code::SessionExpired);
        assert!(client.expired());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_loss() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector =
            RemoteConnector::new(&format!("http://{}", addr), Duration::from_millis(200));
        let err = connector.connect().await.err().unwrap();
        assert_eq!(err.code, Code::ConnectionLoss);
    }
}
