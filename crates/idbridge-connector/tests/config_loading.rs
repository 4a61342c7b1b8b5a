//! Loading the connector configuration from a file and the environment.

use std::io::Write;
use std::time::Duration;

use idbridge_connector::{ConfigError, load_config};

const CONFIG: &str = r#"
issuer = "https://iam.example.com"
client_id = "from-file"
client_secret = "secret"
redirect_uri = "https://broker.example.com/callback"
scopes = ["profile", "email", "federated:id"]
hosted_domains = ["acme.com"]
idm_url = "https://idm.example.com"
enable_group_claim = true
request_timeout = "5s"

[tenant_map]
org-1 = "acme"
"#;

// Environment variables are process-wide, so every case lives in one test.
#[test]
fn test_load_config_file_and_env() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.client_id, "from-file");
    assert_eq!(config.request_timeout, Duration::from_secs(5));
    assert_eq!(config.tenant_map.get("org-1").map(String::as_str), Some("acme"));
    assert_eq!(config.preferred_domain(), Some("acme.com"));
    assert!(config.enable_group_claim);
    assert!(config.insecure_skip_email_verified);
    assert_eq!(config.prompt_type, "consent");
    assert!(!config.effective_scopes().iter().any(|s| s == "federated:id"));

    // SAFETY: no other test in this binary reads the environment.
    unsafe {
        std::env::set_var("IDBRIDGE__CLIENT_ID", "from-env");
        std::env::set_var("IDBRIDGE__HOSTED_DOMAINS", "acme.com,other.com");
        std::env::set_var(
            "IDBRIDGE__ALLOWED_SUBJECT_TOKEN_TYPES",
            "urn:ietf:params:oauth:token-type:access_token",
        );
    }
    let config = load_config(Some(&path));
    unsafe {
        std::env::remove_var("IDBRIDGE__CLIENT_ID");
        std::env::remove_var("IDBRIDGE__HOSTED_DOMAINS");
        std::env::remove_var("IDBRIDGE__ALLOWED_SUBJECT_TOKEN_TYPES");
    }
    let config = config.unwrap();
    assert_eq!(config.client_id, "from-env");
    assert_eq!(config.hosted_domains, vec!["acme.com", "other.com"]);
    assert_eq!(config.preferred_domain(), Some("*"));
    assert_eq!(
        config.allowed_subject_token_types,
        vec!["urn:ietf:params:oauth:token-type:access_token"]
    );

    let missing = tempfile::tempdir().unwrap().path().join("absent.toml");
    let err = load_config(missing.to_str()).unwrap_err();
    assert!(matches!(err, ConfigError::Missing(field) if field == "issuer"));
}
