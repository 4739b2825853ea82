use std::borrow::Cow;
use std::env;
use std::path::Path;

use regex::{Captures, Regex};
use tracing::{debug, info, info_span};

use crate::logship::common::{Error, Result};
use crate::logship::config::settings::SettingsFile;
use crate::logship::config::{HandlerConfig, Tunables};

/// Load `(HandlerConfig, Tunables)` from a YAML file at `path`, running a
/// `${ENV_VAR[:DEFAULT]}` substitution pass before handing the text to
/// `serde_yaml`.
pub fn load_handler_config(path: &Path) -> Result<(HandlerConfig, Tunables)> {
    let _span = info_span!("loading config file");
    info!(path = %path.to_string_lossy(), "loading logship config");
    let raw_yaml = std::fs::read_to_string(path)?;
    let yaml_text = replace_env_vars(&raw_yaml)?;

    let file: SettingsFile = serde_yaml::from_str(&yaml_text)?;
    file.handler.validate()?;
    Ok((file.handler, file.tunables))
}

/// Replace `${ENV_VAR}` or `${ENV_VAR:default}` references in `raw_yaml`
/// with values from the environment, falling back to the given default
/// (or failing if none is given and the variable is unset). A default
/// starting with `?` is instead treated as a required-but-missing error
/// message.
pub fn replace_env_vars(raw_yaml: &str) -> Result<Cow<str>> {
    let re_var = Regex::new(r"\$\{([a-zA-Z_][0-9a-zA-Z_]*)(?::([^}]+?))?\}")
        .expect("static regex is valid");

    let mut errors = Vec::<String>::new();

    let replaced_text = re_var.replace_all(raw_yaml, |caps: &Captures| {
        match env::var(&caps[1]) {
            Ok(val) => val,
            Err(_) => {
                if let Some(default) = caps.get(2) {
                    let s = default.as_str();
                    if let Some(msg) = s.strip_prefix('?') {
                        errors.push(msg.to_string());
                        String::new()
                    } else {
                        s.to_string()
                    }
                } else {
                    errors.push(format!(
                        "environment variable {} is required but not defined",
                        &caps[1]
                    ));
                    String::new()
                }
            }
        }
    });

    debug!(count = errors.len(), "substituted env vars in config");

    if errors.is_empty() {
        Ok(replaced_text)
    } else {
        Err(Error::new(errors.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    // std::env is process-global, so these can't run concurrently with
    // each other without racing on the same var names.

    #[test]
    #[serial]
    fn substitutes_present_var() {
        std::env::set_var("LOGSHIP_TEST_HOST", "collector.example.com");
        let out = replace_env_vars("host: ${LOGSHIP_TEST_HOST}").unwrap();
        assert_eq!(out, "host: collector.example.com");
        std::env::remove_var("LOGSHIP_TEST_HOST");
    }

    #[test]
    #[serial]
    fn falls_back_to_default_when_missing() {
        std::env::remove_var("LOGSHIP_TEST_MISSING");
        let out = replace_env_vars("port: ${LOGSHIP_TEST_MISSING:5959}").unwrap();
        assert_eq!(out, "port: 5959");
    }

    #[test]
    #[serial]
    fn errors_when_required_and_missing() {
        std::env::remove_var("LOGSHIP_TEST_REQUIRED");
        let err = replace_env_vars("host: ${LOGSHIP_TEST_REQUIRED}");
        assert!(err.is_err());
    }

    #[test]
    fn loads_full_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
handler:
  host: 127.0.0.1
  port: 5959
tunables:
  flush_count: 10
"#
        )
        .unwrap();
        let (handler, tunables) = load_handler_config(file.path()).unwrap();
        assert_eq!(handler.host, "127.0.0.1");
        assert_eq!(handler.port, 5959);
        assert_eq!(tunables.flush_count, 10);
        assert_eq!(tunables.flush_interval_ms, 10_000); // default still applies
    }
}
