use appraise_rs::config::{CampaignRegistry, Config, Padding};

// Environment mutation is process-wide, so both cases share one test.
#[test]
fn config_from_env_requires_database_path() {
    unsafe {
        std::env::remove_var("DATABASE_PATH");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::set_var("DATABASE_PATH", "/tmp/appraise-test.db");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.database_path.to_str(), Some("/tmp/appraise-test.db"));
    assert!(!config.log_level.is_empty());

    unsafe {
        std::env::remove_var("DATABASE_PATH");
    }
}

#[test]
fn campaign_dir_loads_every_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("wmt21.toml"),
        r#"
        [campaign]
        name = "wmt21"
        required_annotations = 2
        max_completed_tasks_for_low_trust = 5
        "#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("pilot.toml"),
        "[campaign]\nname = \"pilot\"\npadding = \"none\"\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.md"), "not a campaign").unwrap();

    let registry = CampaignRegistry::load_from_dir(dir.path()).unwrap();
    let wmt = registry.get("wmt21");
    assert_eq!(wmt.required_annotations, 2);
    assert_eq!(wmt.max_completed_tasks_for_low_trust, 5);
    assert_eq!(wmt.low_trust_group, "crowd");
    assert_eq!(registry.get("pilot").padding, Padding::None);
    assert_eq!(registry.get("other").required_annotations, 1);
}

#[test]
fn bad_campaign_file_fails_the_load() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bad.toml"), "[campaign]\ntrust_threshold = \"many\"\n").unwrap();

    assert!(CampaignRegistry::load_from_dir(dir.path()).is_err());
    assert!(CampaignRegistry::load_from_dir(&dir.path().join("missing")).is_err());
}
