//! Documented default configuration

/// Commented configuration file matching [`AppConfig::default`](super::AppConfig)
pub const DEFAULT_CONFIG: &str = r#"# cwchat configuration
# Location: ~/.config/cwchat/config.toml (or $CWCHAT_CONFIG)

[server]
# Address and port of the chat front door (PORT overrides port)
bind = "0.0.0.0"
port = 3000

[worker]
# Command to spawn; defaults to `cwchat-server worker`
# command = "/usr/local/bin/cwchat-server"
# args = ["worker"]
# cwd = "/srv/cwchat"

# "lines" (one JSON document per line) or "document" (back-to-back documents,
# one request in flight at a time)
framing = "lines"

request_timeout_ms = 10000
restart_on_timeout = true
max_in_flight = 32
stop_grace_ms = 2000
start_eagerly = true

[worker.env]
# AWS_REGION = "us-east-1"

[router]
# Reject EC2 CPU requests that do not name an instance
strict = false
default_instance_id = "i-1234567890abcdef0"
default_namespace = "AWS/EC2"
default_metric = "CPUUtilization"

[metrics]
# JSON fixture file served by the worker; synthetic data when unset
# fixtures = "/srv/cwchat/metrics.json"
region = "us-east-1"
"#;
