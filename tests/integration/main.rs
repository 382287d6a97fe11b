//! Integration tests for certcache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn certcache() -> Command {
        let mut cmd = cargo_bin_cmd!("certcache");
        for var in [
            "CACHE_MANAGER",
            "IAM_TOKEN",
            "IAM_REFRESH_TOKEN",
            "ZOOKEEPER_HOST_LIST",
            "MARATHON_USER",
            "MARATHON_PASSWD",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }

    #[test]
    fn help_displays() {
        certcache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("get-proxy"));
    }

    #[test]
    fn version_displays() {
        certcache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("certcache"));
    }

    #[test]
    fn config_path_honours_flag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        certcache()
            .args(["config", "path", "--config"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_path_ignores_broken_environment() {
        let dir = TempDir::new().unwrap();
        certcache()
            .env("CERTCACHE_CONFIG", dir.path().join("custom.toml"))
            .env("CACHE_MANAGER", "REDIS")
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show_masks_secrets() {
        let dir = TempDir::new().unwrap();
        certcache()
            .env("CERTCACHE_CONFIG", dir.path().join("missing.toml"))
            .env("IAM_CLIENT_SECRET", "very-secret-value")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("very-secret-value").not());
    }

    #[test]
    fn unknown_cache_manager_rejected() {
        let dir = TempDir::new().unwrap();
        certcache()
            .env("CERTCACHE_CONFIG", dir.path().join("missing.toml"))
            .env("CACHE_MANAGER", "REDIS")
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown cache manager"));
    }

    #[test]
    fn zookeeper_requires_host_list() {
        let dir = TempDir::new().unwrap();
        certcache()
            .env("CERTCACHE_CONFIG", dir.path().join("missing.toml"))
            .env("CACHE_MANAGER", "ZOOKEEPER")
            .args(["cache", "get", "refresh_token"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("ZOOKEEPER_HOST_LIST"));
    }

    #[test]
    fn invalid_variable_name_rejected() {
        let dir = TempDir::new().unwrap();
        certcache()
            .env("CERTCACHE_CONFIG", dir.path().join("missing.toml"))
            .args(["cache", "get", "/refresh_token"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid cache variable name"));
    }
}

#[cfg(unix)]
mod workflow_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BUNDLE: &str = r#"{"credential":{"entries":[
        {"name":"Certificate","type":"textfile","value":"CERT"},
        {"name":"Private Key","type":"textfile","value":"KEY"},
        {"name":"Passphrase","type":"text","value":"pw"}
    ]}}"#;

    /// Generator stand-in: copies the passphrase from stdin to `-out`
    const GENERATOR: &str = r#"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-out" ]; then out="$2"; shift; fi
  shift
done
cat > "$out"
"#;

    struct Env {
        dir: TempDir,
        server: MockServer,
    }

    impl Env {
        async fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                server: MockServer::start().await,
            }
        }

        fn work_dir(&self) -> PathBuf {
            self.dir.path().join("work")
        }

        /// Config file pointing IAM and TTS at the mock server
        fn config(&self, generator_body: &str) -> PathBuf {
            let script = self.dir.path().join("generator.sh");
            std::fs::write(&script, generator_body).unwrap();

            let config = format!(
                r#"
[general]
work_dir = "{work}"

[iam]
endpoint = "{uri}"

[tts]
base_url = "{uri}"

[proxy]
generator = "sh {script}"

[http]
max_retries = 0
"#,
                work = self.work_dir().display(),
                uri = self.server.uri(),
                script = script.display(),
            );
            let path = self.dir.path().join("config.toml");
            std::fs::write(&path, config).unwrap();
            path
        }

        fn command(&self, config: PathBuf) -> Command {
            let mut cmd = cargo_bin_cmd!("certcache");
            cmd.env_remove("CACHE_MANAGER")
                .env_remove("IAM_REFRESH_TOKEN")
                .env("CERTCACHE_CONFIG", config)
                .env("IAM_TOKEN", "identity-token")
                .env("IAM_CLIENT_ID", "client")
                .env("IAM_CLIENT_SECRET", "secret");
            cmd
        }

        fn seed_fresh_bundle(&self) {
            let work = self.work_dir();
            std::fs::create_dir_all(&work).unwrap();
            std::fs::write(work.join("usercert.crt"), "CERT").unwrap();
            std::fs::write(work.join("userkey.key"), "KEY").unwrap();
            std::fs::write(work.join("userpasswd.txt"), "pw").unwrap();
            std::fs::write(work.join("output.json"), BUNDLE).unwrap();
        }

        async fn mount_exchange(&self, status: u16, expect: u64) {
            Mock::given(method("POST"))
                .and(path("/token"))
                .and(body_string_contains("token-exchange"))
                .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                    "access_token": "exchanged-access",
                    "refresh_token": "refresh-1"
                })))
                .expect(expect)
                .mount(&self.server)
                .await;
        }

        async fn mount_tts(&self, expect: u64) {
            Mock::given(method("POST"))
                .and(path("/api/v2/iam/credential"))
                .respond_with(ResponseTemplate::new(303).insert_header(
                    "location",
                    "https://tts.example.org/api/v2/iam/credential_data/42",
                ))
                .expect(expect)
                .mount(&self.server)
                .await;
            Mock::given(method("GET"))
                .and(path("/api/v2/iam/credential_data/42"))
                .respond_with(ResponseTemplate::new(200).set_body_string(BUNDLE))
                .expect(expect)
                .mount(&self.server)
                .await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_bundle_exchanges_and_generates_proxy() {
        let env = Env::new().await;
        env.mount_exchange(200, 1).await;
        env.mount_tts(1).await;
        let output = env.dir.path().join("proxy.pem");

        env.command(env.config(GENERATOR))
            .args(["get-proxy", "--output"])
            .arg(&output)
            .assert()
            .success();

        assert_eq!(std::fs::read_to_string(&output).unwrap(), "pw");
        let work = env.work_dir();
        assert_eq!(std::fs::read_to_string(work.join("usercert.crt")).unwrap(), "CERT");
        assert_eq!(std::fs::read_to_string(work.join("refresh_token")).unwrap(), "refresh-1");
        assert!(!work.join("lock").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_exchange_without_refresh_token_fails_before_tts() {
        let env = Env::new().await;
        env.mount_exchange(401, 1).await;
        env.mount_tts(0).await;

        env.command(env.config(GENERATOR))
            .arg("get-proxy")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Token exchange rejected"));

        assert!(!env.work_dir().join("output.json").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fresh_bundle_makes_no_outbound_calls() {
        let env = Env::new().await;
        env.seed_fresh_bundle();
        env.mount_exchange(200, 0).await;
        env.mount_tts(0).await;

        env.command(env.config(GENERATOR))
            .arg("get-proxy")
            .assert()
            .success()
            .stdout(predicate::str::contains("userproxy.pem"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_generator_keeps_credential_files() {
        let env = Env::new().await;
        env.mount_exchange(200, 1).await;
        env.mount_tts(1).await;

        env.command(env.config("echo 'bad passphrase' >&2\nexit 1\n"))
            .arg("get-proxy")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Proxy generator"));

        let work = env.work_dir();
        assert!(work.join("usercert.crt").exists());
        assert!(work.join("userkey.key").exists());
        assert!(!work.join("userproxy.pem").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn marathon_cache_read_through_cli() {
        let env = Env::new().await;
        let blob = json!({"refresh_token": "from-marathon"}).to_string();
        Mock::given(method("GET"))
            .and(path("/v2/apps/certcache"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "app": {"env": {"CERTCACHE_CACHE": blob}}
            })))
            .expect(1)
            .mount(&env.server)
            .await;

        let config = env.dir.path().join("marathon.toml");
        std::fs::write(
            &config,
            format!(
                "[cache]\nbackend = \"marathon\"\n\n[cache.marathon]\nurl = \"{}\"\napp_id = \"/certcache\"\n",
                env.server.uri()
            ),
        )
        .unwrap();

        env.command(config)
            .env("MARATHON_USER", "user")
            .env("MARATHON_PASSWD", "passwd")
            .args(["cache", "get", "refresh_token"])
            .assert()
            .success()
            .stdout(predicate::str::contains("from-marathon"));
    }
}
