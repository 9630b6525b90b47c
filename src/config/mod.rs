pub mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

const LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error", "fatal"];
const DNS_RECORD_TYPES: &[&str] = &["A", "AAAA", "CNAME"];
const MAX_RETRIES: u32 = 10;
const MAX_TRY_INTERVAL: u64 = 60;

impl Config {
    /// Load configuration from a YAML file. `${VAR}` substrings are
    /// expanded from the process environment (unset variables expand to
    /// the empty string) before parsing, then the tree is validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let expanded = expand_env(&content);

        let config: Config = serde_yaml::from_str(&expanded)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.global.port == 0 {
            bail!("global.port: must be in 1..65535");
        }
        if !LOG_LEVELS.contains(&self.global.log_level.as_str()) {
            bail!(
                "global.log_level: unknown level {:?}, expected one of {}",
                self.global.log_level,
                LOG_LEVELS.join("|")
            );
        }

        for (li, listener) in self.listeners.iter().enumerate() {
            if listener.host.is_empty() {
                bail!("listeners[{li}].host: at least one host:port entry is required");
            }
            for host in &listener.host {
                validate_host(host).with_context(|| format!("listeners[{li}].host"))?;
            }

            for (hi, handler) in listener.handlers.iter().enumerate() {
                handler
                    .validate()
                    .with_context(|| format!("listeners[{li}].handlers[{hi}]"))?;
            }
        }

        Ok(())
    }
}

impl HandlerConfig {
    fn validate(&self) -> Result<()> {
        if let Some(sf) = &self.static_files {
            if sf.root.is_empty() {
                bail!("static_files.root: must not be empty");
            }
        }

        if let Some(rp) = &self.reverse_proxy {
            let lb = &rp.load_balancing;
            if lb.retries > MAX_RETRIES {
                bail!(
                    "reverse_proxy.load_balancing.retries: {} exceeds maximum {}",
                    lb.retries,
                    MAX_RETRIES
                );
            }
            if lb.try_interval > MAX_TRY_INTERVAL {
                bail!(
                    "reverse_proxy.load_balancing.try_interval: {} exceeds maximum {}",
                    lb.try_interval,
                    MAX_TRY_INTERVAL
                );
            }
            for (di, dynamic) in rp.upstreams.dynamic.iter().enumerate() {
                if !DNS_RECORD_TYPES.contains(&dynamic.record_type.as_str()) {
                    bail!(
                        "reverse_proxy.upstreams.dynamic[{di}].type: unknown record type {:?}, expected one of {}",
                        dynamic.record_type,
                        DNS_RECORD_TYPES.join("|")
                    );
                }
                if dynamic.value.is_empty() {
                    bail!("reverse_proxy.upstreams.dynamic[{di}].value: must not be empty");
                }
            }
        }

        Ok(())
    }
}

fn validate_host(host: &str) -> Result<()> {
    let Some((hostname, port)) = host.rsplit_once(':') else {
        bail!("{host:?}: expected \"hostname:port\"");
    };
    if hostname.is_empty() {
        bail!("{host:?}: hostname must not be empty");
    }
    let port: u32 = port
        .parse()
        .with_context(|| format!("{host:?}: port is not a number"))?;
    if port == 0 || port > 65535 {
        bail!("{host:?}: port must be in 1..65535");
    }
    Ok(())
}

/// Expand `${VAR}` substrings from the process environment. Variables
/// set to the empty string and unset variables both expand to "".
fn expand_env(content: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern");
    re.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml(extra: &str) -> String {
        format!(
            r#"
global:
  port: 2019
listeners:
  - host: ["localhost:8080"]
    handlers:
{extra}
"#
        )
    }

    #[test]
    fn test_expand_env_set_and_unset() {
        std::env::set_var("REPROXY_TEST_BODY", "hello");
        let out = expand_env("body: ${REPROXY_TEST_BODY} ${REPROXY_TEST_UNSET_XYZ}!");
        assert_eq!(out, "body: hello !");
    }

    #[test]
    fn test_validate_host() {
        assert!(validate_host("example.com:8080").is_ok());
        assert!(validate_host("127.0.0.1:1").is_ok());
        assert!(validate_host("example.com").is_err());
        assert!(validate_host(":8080").is_err());
        assert!(validate_host("example.com:0").is_err());
        assert!(validate_host("example.com:notaport").is_err());
        assert!(validate_host("example.com:70000").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_admin_port() {
        let cfg: Config = serde_yaml::from_str("global: { port: 0 }").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let cfg: Config = serde_yaml::from_str("global: { port: 2019, log_level: loud }").unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("log_level"), "unexpected error: {err}");
    }

    #[test]
    fn test_validate_rejects_out_of_range_retries() {
        let yaml = minimal_yaml(
            r#"      - reverse_proxy:
          upstreams:
            static: ["http://127.0.0.1:9000"]
          load_balancing:
            retries: 11
"#,
        );
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        let err = format!("{:#}", cfg.validate().unwrap_err());
        assert!(err.contains("retries"), "unexpected error: {err}");
    }

    #[test]
    fn test_validate_rejects_unknown_record_type() {
        let yaml = minimal_yaml(
            r#"      - reverse_proxy:
          upstreams:
            dynamic:
              - type: MX
                value: mail.example.com
"#,
        );
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        let err = format!("{:#}", cfg.validate().unwrap_err());
        assert!(err.contains("record type"), "unexpected error: {err}");
    }

    #[test]
    fn test_validate_rejects_empty_static_root() {
        let yaml = minimal_yaml(
            r#"      - static_files:
          root: ""
"#,
        );
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_minimal() {
        let yaml = minimal_yaml(
            r#"      - static_response:
          status: 200
          body: pong
"#,
        );
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        cfg.validate().unwrap();
    }
}
