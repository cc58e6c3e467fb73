// 公开 API 集成测试（不访问网络）

use std::sync::{Arc, Mutex};

use terma::models::{AuthMethod, HostIdentity, ServerProfile};
use terma::services::host_keys::HostKeyStore;
use terma::services::secrets::MemorySecretStore;
use terma::services::storage::Preferences;
use terma::services::{fingerprint, HostKeyVerdict};
use terma::ssh::private_key::{self, KeyType};
use terma::ssh::{
    HostKeyPrompt, KeyParseError, SessionState, SshError, SshManager, TerminalSink,
};
use terma::AppServices;

const ED25519: &str = include_str!("fixtures/keys/id_ed25519");
const ENCRYPTED: &str = include_str!("fixtures/keys/id_ed25519_encrypted");
const P384_PKCS8: &str = include_str!("fixtures/keys/ec_p384_pkcs8.pem");

#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<SessionState>>,
}

impl TerminalSink for Recorder {
    fn on_data(&self, _data: &[u8]) {}

    fn on_state(&self, state: &SessionState) {
        self.states.lock().unwrap().push(state.clone());
    }

    fn on_connection_lost(&self, _error: &str) {}
}

#[test]
fn trust_decisions_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("preferences.json");
    let identity = HostIdentity::new("example.com", 2222);

    {
        let store = HostKeyStore::new(Arc::new(Preferences::open(&path)));
        assert!(matches!(
            store.verify(&identity, b"key-a").unwrap(),
            HostKeyVerdict::Unknown { .. }
        ));
        store.trust(&identity, b"key-a").unwrap();
    }

    let store = HostKeyStore::new(Arc::new(Preferences::open(&path)));
    assert!(store.verify(&identity, b"key-a").unwrap().is_trusted());
    assert_eq!(
        store.verify(&identity, b"key-b").unwrap(),
        HostKeyVerdict::Changed {
            old_fingerprint: fingerprint(b"key-a"),
            new_fingerprint: fingerprint(b"key-b"),
        }
    );
    // 同一主机的其他端口互不影响
    assert!(matches!(
        store
            .verify(&HostIdentity::new("example.com", 22), b"key-a")
            .unwrap(),
        HostKeyVerdict::Unknown { .. }
    ));
}

#[test]
fn key_fixtures_parse_or_fail_cleanly() {
    let ed25519 = private_key::parse(ED25519.as_bytes(), None).unwrap();
    assert_eq!(ed25519.key_type, KeyType::Ed25519);

    let p384 = private_key::parse(P384_PKCS8.as_bytes(), None).unwrap();
    assert_eq!(p384.key_type, KeyType::P384);

    assert!(matches!(
        private_key::parse(ENCRYPTED.as_bytes(), Some("secret")),
        Err(KeyParseError::EncryptedKeyUnsupported)
    ));
    assert!(matches!(
        private_key::parse(b"not a key", None),
        Err(KeyParseError::InvalidFormat)
    ));
}

#[tokio::test]
async fn stored_key_with_bad_content_fails_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let secrets = Arc::new(MemorySecretStore::new());
    let services = Arc::new(AppServices::load(dir.path(), secrets).unwrap());

    let profile = ServerProfile::new("db", "192.0.2.10", 22, "deploy", AuthMethod::SshKey);
    services.profiles.add_profile(profile.clone()).unwrap();
    services
        .credentials
        .save_credentials(&profile, None, Some(b"garbage"), None)
        .unwrap();

    let manager = SshManager::new(services.clone(), HostKeyPrompt::default());
    let sink = Arc::new(Recorder::default());
    let connector = manager.open(profile.clone(), sink.clone()).unwrap();

    let result = connector.connect(None).await;
    assert!(matches!(
        result,
        Err(SshError::InvalidKey(KeyParseError::InvalidFormat))
    ));
    assert_eq!(connector.state(), SessionState::Disconnected);
    assert!(sink.states.lock().unwrap().is_empty());

    let stored = services.profiles.get_profile(profile.id).unwrap().unwrap();
    assert!(stored.last_connected_at.is_none());

    manager.close_all();
}
