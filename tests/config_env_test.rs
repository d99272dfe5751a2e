use pathwatch::Settings;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_env_override_with_nested_keys() {
    // Run from a temp directory so a real .pathwatch/ is not picked up
    let temp_dir = TempDir::new().unwrap();
    let original_dir = env::current_dir().unwrap();
    env::set_current_dir(&temp_dir).unwrap();

    fs::create_dir(temp_dir.path().join(".pathwatch")).unwrap();
    fs::write(
        temp_dir.path().join(".pathwatch").join("settings.toml"),
        "[watcher]\nsettle_ms = 15\nrename_retries = 4\n",
    )
    .unwrap();

    unsafe {
        // Double underscore separates nested levels
        env::set_var("PATHWATCH_WATCHER__RENAME_RETRIES", "9");
        env::set_var("PATHWATCH_LOGGING__DEFAULT", "debug");
    }

    let settings = Settings::load();

    unsafe {
        env::remove_var("PATHWATCH_WATCHER__RENAME_RETRIES");
        env::remove_var("PATHWATCH_LOGGING__DEFAULT");
    }
    env::set_current_dir(original_dir).unwrap();

    let settings = settings.unwrap();
    // From the file
    assert_eq!(settings.watcher.settle_ms, 15);
    // Environment wins over the file
    assert_eq!(settings.watcher.rename_retries, 9);
    assert_eq!(settings.logging.default, "debug");
    // Untouched
    assert_eq!(settings.watcher.thread_name, "pathwatch-server");
}
