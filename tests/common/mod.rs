#![allow(dead_code)]

use std::sync::Once;
use tabularium::auth::Authority;
use tabularium::{Authentication, Config, RepoHost};

static TRACING: Once = Once::new();

/// Route crate logs through `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// An open host over a temporary directory, torn down with the test.
pub struct TestHost {
    pub host: RepoHost,
    pub dir: tempfile::TempDir,
}

impl TestHost {
    /// The seeded administrator's session.
    pub fn login_admin(&self) -> Authentication {
        self.host.login("admin", "admin").unwrap()
    }

    /// Register `id` with a known password and log them in.
    pub fn login_user(&self, admin: &Authentication, id: &str, authority: Authority) -> Authentication {
        self.host
            .users()
            .unwrap()
            .add_user(admin, id, id, "hunter2", authority)
            .unwrap();
        self.host.login(id, "hunter2").unwrap()
    }
}

pub fn config_in(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.storage.base_path = dir.to_path_buf();
    config
}

/// Open a fresh host in a temp directory.
pub async fn open_host() -> TestHost {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let host = RepoHost::new(config_in(dir.path())).unwrap();
    host.open().await.unwrap();
    TestHost { host, dir }
}
