use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 12] = [
    "CODERAG_SOURCE_PATH",
    "CODERAG_INDEX_STORAGE",
    "CODERAG_LLM_PROVIDER",
    "CODERAG_LLM_BASE_URL",
    "CODERAG_LLM_MODEL",
    "CODERAG_LLM_EMBEDDING_MODEL",
    "CODERAG_LLM_API_KEY",
    "CODERAG_RETRIEVAL_TOP_K",
    "CODERAG_RETRIEVAL_SCORE_THRESHOLD",
    "CODERAG_CHUNK_SIZE",
    "CODERAG_CHUNK_OVERLAP",
    "CODERAG_TIMEOUT_GENERATION",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("coderag.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{body}").unwrap();
    path
}

#[test]
fn defaults_match_documented_values() {
    let config = Config::default();
    assert_eq!(config.source.path, PathBuf::from("."));
    assert_eq!(config.storage.path, ".coderag/index.db");
    assert_eq!(config.llm.provider, ProviderKind::Ollama);
    assert_eq!(config.llm.base_url, "http://localhost:11434");
    assert_eq!(config.llm.model, "codellama:7b");
    assert_eq!(config.llm.embedding_model, "all-minilm:l6-v2");
    assert!((config.llm.temperature - 0.1).abs() < f32::EPSILON);
    assert_eq!(config.llm.context_window, 4096);
    assert_eq!(config.chunker.size, 2048);
    assert_eq!(config.chunker.overlap, 200);
    assert_eq!(config.retrieval.top_k, 10);
    assert!((config.retrieval.score_threshold - 0.25).abs() < f32::EPSILON);
    assert_eq!(config.synthesis.context_budget, 12_000);
    assert_eq!(config.synthesis.max_citations, 5);
    assert_eq!(config.timeouts.generation(), Duration::from_secs(300));
    assert_eq!(config.retry.max_retries, 2);
    assert_eq!(config.debounce(), Duration::from_secs(2));
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.llm.model, "codellama:7b");
    assert_eq!(config.retrieval.top_k, 10);
}

#[test]
#[serial]
fn parse_partial_toml() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[source]
path = "/srv/repo"
exclude = ["*.lock", "target/"]

[llm]
provider = "compatible"
base_url = "http://localhost:8000/v1"
model = "qwen2.5-coder"

[retrieval]
top_k = 4
"#,
    );

    let config = Config::load(&path).unwrap();
    assert_eq!(config.source.path, PathBuf::from("/srv/repo"));
    assert_eq!(config.source.exclude, vec!["*.lock", "target/"]);
    assert_eq!(config.llm.provider, ProviderKind::Compatible);
    assert_eq!(config.llm.model, "qwen2.5-coder");
    assert_eq!(config.llm.embedding_model, "all-minilm:l6-v2");
    assert_eq!(config.retrieval.top_k, 4);
    assert!((config.retrieval.score_threshold - 0.25).abs() < f32::EPSILON);
    assert_eq!(config.chunker.size, 2048);
}

#[test]
#[serial]
fn malformed_toml_is_rejected() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[retrieval]\ntop_k = \"many\"\n");
    assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
}

#[test]
#[serial]
fn env_overrides_take_precedence() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[llm]\nmodel = \"from-file\"\n");

    unsafe {
        std::env::set_var("CODERAG_LLM_MODEL", "from-env");
        std::env::set_var("CODERAG_INDEX_STORAGE", ":memory:");
        std::env::set_var("CODERAG_RETRIEVAL_TOP_K", "3");
        std::env::set_var("CODERAG_RETRIEVAL_SCORE_THRESHOLD", "0.5");
        std::env::set_var("CODERAG_CHUNK_SIZE", "1000");
        std::env::set_var("CODERAG_CHUNK_OVERLAP", "100");
        std::env::set_var("CODERAG_TIMEOUT_GENERATION", "30");
        std::env::set_var("CODERAG_LLM_API_KEY", "sk-test");
    }

    let config = Config::load(&path).unwrap();
    clear_env();

    assert_eq!(config.llm.model, "from-env");
    assert_eq!(config.storage.path, ":memory:");
    assert_eq!(config.retrieval.top_k, 3);
    assert!((config.retrieval.score_threshold - 0.5).abs() < f32::EPSILON);
    assert_eq!(config.chunker.size, 1000);
    assert_eq!(config.chunker.overlap, 100);
    assert_eq!(config.timeouts.generation_seconds, 30);
    assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
}

#[test]
#[serial]
fn unparsable_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("CODERAG_RETRIEVAL_TOP_K", "lots");
        std::env::set_var("CODERAG_LLM_PROVIDER", "carrier-pigeon");
    }
    let mut config = Config::default();
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.retrieval.top_k, 10);
    assert_eq!(config.llm.provider, ProviderKind::Ollama);
}

#[test]
#[serial]
fn provider_env_override_parses_kind() {
    clear_env();
    unsafe { std::env::set_var("CODERAG_LLM_PROVIDER", "compatible") };
    let mut config = Config::default();
    config.apply_env_overrides();
    clear_env();
    assert_eq!(config.llm.provider, ProviderKind::Compatible);
}

#[test]
#[serial]
fn overlap_not_smaller_than_size_fails_validation() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[chunker]\nsize = 100\noverlap = 100\n");
    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains("overlap")));
}

#[test]
fn zero_top_k_fails_validation() {
    let mut config = Config::default();
    config.retrieval.top_k = 0;
    assert!(config.validate().is_err());
}

#[test]
fn out_of_range_threshold_fails_validation() {
    let mut config = Config::default();
    config.retrieval.score_threshold = 1.5;
    assert!(config.validate().is_err());
}

#[test]
fn zero_timeout_fails_validation() {
    let mut config = Config::default();
    config.timeouts.query_seconds = Some(0);
    assert!(config.validate().is_err());
}

#[test]
fn default_query_timeout_covers_retry_budget() {
    let config = Config::default();
    // Three 300 s attempts per phase plus 0.5 s and 1 s of backoff each.
    assert_eq!(config.retry_budget(), Duration::from_secs(1_803));
    assert_eq!(config.query_timeout(), config.retry_budget());
    assert_eq!(config.agent_config().query_timeout, Duration::from_secs(1_803));
}

#[test]
fn short_query_timeout_fails_validation() {
    let mut config = Config::default();
    config.timeouts.query_seconds = Some(600);
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("retry budget"));

    config.timeouts.query_seconds = Some(1_803);
    assert!(config.validate().is_ok());
    assert_eq!(config.query_timeout(), Duration::from_secs(1_803));
}

#[test]
fn retry_budget_follows_retry_settings() {
    let mut config = Config::default();
    config.retry.max_retries = 0;
    assert_eq!(config.retry_budget(), Duration::from_secs(600));
    config.timeouts.query_seconds = Some(600);
    assert!(config.validate().is_ok());
}

#[test]
fn runtime_configs_carry_values() {
    let mut config = Config::default();
    config.source.exclude = vec!["vendor/".into()];
    config.chunker.size = 512;
    config.chunker.overlap = 64;
    config.retry.max_retries = 0;

    let indexer = config.indexer_config();
    assert_eq!(indexer.walker.exclude, vec!["vendor/"]);
    assert_eq!(indexer.chunker.target_size, 512);
    assert_eq!(indexer.chunker.overlap, 64);
    assert_eq!(indexer.embed_batch_size, 16);
    assert_eq!(indexer.retry.max_retries, 0);

    let retrieval = config.retrieval_config();
    assert_eq!(retrieval.top_k, 10);
    assert_eq!(retrieval.embed_timeout, Duration::from_secs(300));

    let synth = config.synthesizer_config();
    assert_eq!(synth.context_budget, 12_000);
    assert_eq!(synth.max_citations, 5);

    let agent = config.agent_config();
    assert_eq!(agent.query_timeout, Duration::from_secs(600));
    assert_eq!(config.timeouts.query_seconds, None);
}

#[test]
fn debug_redacts_api_key() {
    let mut config = Config::default();
    config.llm.api_key = Some("sk-secret".into());
    let rendered = format!("{:?}", config.llm);
    assert!(!rendered.contains("sk-secret"));
    assert!(rendered.contains("<redacted>"));
}
