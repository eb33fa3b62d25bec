use agora::agents::config::{CoordinationMode, LlmProviderType, StoreBackend};
use agora::config::Settings;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_external_agents() -> anyhow::Result<()> {
    // Create a temporary directory
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();

    fs::create_dir_all(root.join("config/agents"))?;

    // Create agora.toml
    let agora_toml = r#"
default_provider = "local"

[server]
host = "127.0.0.1"
port = 3100

[engine]
default_mode = "debate"
supporting_agents = 1
invocation_timeout_secs = 20

[[providers]]
name = "local"
provider = "echo"
model = "echo-1"
"#;
    fs::write(root.join("agora.toml"), agora_toml)?;

    // An agent in JSON
    let general_json = r#"
{
    "role": "general",
    "display_name": "General Assistant",
    "system_prompt": "You are a helpful assistant.",
    "base_confidence": 0.3
}
"#;
    fs::write(root.join("config/agents/01_general.json"), general_json)?;

    // An agent in YAML
    let code_yaml = r#"
role: code
display_name: Software Engineer
system_prompt: You write code for {{ session_id }}.
keywords: [build, code, app]
consults: [general]
"#;
    fs::write(root.join("config/agents/02_code.yaml"), code_yaml)?;

    // An agent in TOML
    let rag_toml = r#"
role = "rag"
display_name = "Knowledge Specialist"
system_prompt = "Answer from the knowledge base."
keywords = ["document", "policy"]
uses_retrieval = true
"#;
    fs::write(root.join("config/agents/03_rag.toml"), rag_toml)?;

    // Ignored: not a config extension
    fs::write(root.join("config/agents/notes.txt"), "not an agent")?;

    let settings = Settings::from_root(root.to_str().unwrap())?;

    assert_eq!(settings.server.port, 3100);
    assert_eq!(settings.engine.default_mode, CoordinationMode::Debate);
    assert_eq!(settings.engine.supporting_agents, 1);
    assert_eq!(settings.engine.invocation_timeout_secs, 20);
    // untouched keys keep their defaults
    assert_eq!(settings.engine.primary_retries, 1);
    assert_eq!(settings.persistence.backend, StoreBackend::InMemory);

    assert_eq!(settings.providers.len(), 1);
    assert_eq!(settings.providers[0].provider, LlmProviderType::Echo);

    let roles: Vec<&str> = settings.agents.iter().map(|a| a.role.as_str()).collect();
    assert_eq!(roles, vec!["general", "code", "rag"]);

    let code = &settings.agents[1];
    assert_eq!(code.base_confidence, 0.2);
    assert_eq!(code.consults, vec!["general"]);
    assert!(settings.agents[2].uses_retrieval);

    Ok(())
}

#[test]
fn test_missing_config_uses_defaults() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let settings = Settings::from_root(temp_dir.path().to_str().unwrap())?;

    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 3000);
    assert_eq!(settings.engine.default_mode, CoordinationMode::Collaborative);
    assert!(settings.agents.is_empty());
    assert!(settings.providers.is_empty());
    Ok(())
}

#[test]
fn test_unknown_provider_reference_fails() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    fs::create_dir_all(root.join("config/agents"))?;

    fs::write(
        root.join("config/agents/general.yaml"),
        r#"
role: general
display_name: General Assistant
system_prompt: Help.
provider: missing
"#,
    )?;

    let err = Settings::from_root(root.to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("unknown provider 'missing'"));
    Ok(())
}

#[test]
fn test_fallback_role_must_be_registered() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    fs::create_dir_all(root.join("config/agents"))?;

    fs::write(
        root.join("config/agents/code.yaml"),
        r#"
role: code
display_name: Software Engineer
system_prompt: Write code.
"#,
    )?;

    let err = Settings::from_root(root.to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("Fallback role 'general'"));

    // Naming a registered fallback fixes it
    fs::write(
        root.join("agora.toml"),
        r#"
[server]
host = "127.0.0.1"
port = 3000

[engine]
fallback_role = "code"
"#,
    )?;
    let settings = Settings::from_root(root.to_str().unwrap())?;
    assert_eq!(settings.engine.fallback_role.as_deref(), Some("code"));
    Ok(())
}

#[test]
fn test_duplicate_roles_rejected() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    fs::create_dir_all(root.join("config/agents"))?;

    let general = r#"
role: general
display_name: General Assistant
system_prompt: Help.
"#;
    fs::write(root.join("config/agents/a.yaml"), general)?;
    fs::write(root.join("config/agents/b.yaml"), general)?;

    let err = Settings::from_root(root.to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("Agent role 'general' appears"));
    Ok(())
}
