//! Loading `SocketConfig` from disk.

use handle_socket::SocketConfig;
use handle_socket::config::LogFormat;
use handle_socket::error::ConfigError;
use std::io::Write;

#[test]
fn loads_file_with_defaults_filled_in() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "overlapped = true").unwrap();
    writeln!(file, "[log]").unwrap();
    writeln!(file, "format = \"json\"").unwrap();

    let config = SocketConfig::load(file.path()).unwrap();
    assert!(config.overlapped);
    assert_eq!(config.read_chunk_size, 4096);
    assert_eq!(config.log.format, LogFormat::Json);
    assert_eq!(config.log.level, "info");
}

#[test]
fn missing_file_names_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    match SocketConfig::load(&path).unwrap_err() {
        ConfigError::ReadFailed(shown, _) => assert!(shown.ends_with("absent.toml")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn invalid_values_fail_validation() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "stderr_line_limit = 0").unwrap();
    assert!(matches!(
        SocketConfig::load(file.path()),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn unknown_format_is_a_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[log]\nformat = \"xml\"").unwrap();
    assert!(matches!(
        SocketConfig::load(file.path()),
        Err(ConfigError::ParseFailed(_))
    ));
}
