use std::io::Write;
use std::path::Path;
use std::time::Duration;

use memoflight_service::caching::KeyState;
use memoflight_service::config::Config;

use crate::{Squares, with_config};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_default_config() {
    let config = Config::get(None).unwrap();
    assert_eq!(config.cache.name, "computations");
    assert_eq!(config.cache.max_capacity, None);
    assert_eq!(config.metrics.prefix, "memoflight");
}

#[test]
fn test_missing_config_file() {
    let err = Config::get(Some(Path::new("/does/not/exist.yml"))).unwrap_err();
    assert!(err.to_string().contains("failed to open configuration file"));
}

#[tokio::test]
async fn test_coordinator_from_config_file() {
    memoflight_test::setup();

    let file = write_config(
        "cache:\n  name: squares\n  max_capacity: 100\n  wait_timeout: 1s\n",
    );
    let config = Config::get(Some(file.path())).unwrap();

    let squares = Squares::new(Duration::ZERO);
    let coordinator = with_config(&squares, config.cache);
    assert_eq!(coordinator.config().name, "squares");
    assert_eq!(coordinator.config().wait_timeout, Some(Duration::from_secs(1)));

    assert_eq!(coordinator.get(9).await, Ok(81));
    assert_eq!(coordinator.state(&9), KeyState::Cached);
}
